//! Dominator-tree-DFS SSA renaming with one integer stack per pre-rename
//! vreg. Iterative (explicit stack), per the "avoid recursion on the
//! dominator tree" design guidance.

use cc_analysis::dominator_tree_children;
use cc_ir::{BlockId, Function, InstExt, Operand, VregId};
use std::collections::HashMap;

struct Frame {
    block: BlockId,
    children: Vec<BlockId>,
    next_child: usize,
    pushed: Vec<VregId>,
}

fn fresh_push(f: &mut Function, stacks: &mut HashMap<VregId, Vec<VregId>>, pushed: &mut Vec<VregId>, original: VregId) -> VregId {
    let new_vreg = f.new_vreg();
    stacks.entry(original).or_default().push(new_vreg);
    pushed.push(original);
    new_vreg
}

fn current_top(stacks: &HashMap<VregId, Vec<VregId>>, original: VregId) -> Option<VregId> {
    stacks.get(&original).and_then(|s| s.last().copied())
}

/// Renames every vreg defined before this pass began into SSA form:
/// phi destinations and instruction destinations each get a fresh vreg
/// pushed onto their original vreg's stack; uses are rewritten to the
/// current top of that stack. Parameters are pre-seeded with an implicit
/// entry definition. Requires `insert_phis` and
/// `cc_analysis::compute_dominators` to have already run.
pub fn rename(f: &mut Function) {
    let pre_ssa_count = f.vreg_count();
    let mut stacks: HashMap<VregId, Vec<VregId>> = HashMap::new();

    let mut param_entry_versions = Vec::with_capacity(f.params.len());
    for (name, _ty) in f.params.clone() {
        let original = f.variable(&name).expect("parameter must be a declared variable").vreg;
        let entry_version = f.new_vreg();
        stacks.entry(original).or_default().push(entry_version);
        param_entry_versions.push(entry_version);
    }
    f.param_entry_versions = param_entry_versions;

    let children = dominator_tree_children(f);
    let mut stack = vec![Frame {
        block: f.entry,
        children: children[f.entry.index()].clone(),
        next_child: 0,
        pushed: Vec::new(),
    }];

    while let Some(top) = stack.len().checked_sub(1) {
        let block = stack[top].block;
        let next_child = stack[top].next_child;

        if next_child == 0 {
            let mut pushed = std::mem::take(&mut stack[top].pushed);
            rename_block(f, block, pre_ssa_count, &mut stacks, &mut pushed);
            stack[top].pushed = pushed;
        }

        if next_child < stack[top].children.len() {
            let child = stack[top].children[next_child];
            stack[top].next_child += 1;
            stack.push(Frame {
                block: child,
                children: children[child.index()].clone(),
                next_child: 0,
                pushed: Vec::new(),
            });
        } else {
            let pushed = std::mem::take(&mut stack[top].pushed);
            for original in pushed {
                stacks.get_mut(&original).expect("pushed vreg must have a stack").pop();
            }
            stack.pop();
        }
    }

    f.is_ssa = true;
}

fn rename_block(
    f: &mut Function,
    block: BlockId,
    pre_ssa_count: u32,
    stacks: &mut HashMap<VregId, Vec<VregId>>,
    pushed: &mut Vec<VregId>,
) {
    let n = f.block(block).insts.len();
    for ii in 0..n {
        let is_phi = f.block(block).insts[ii].opcode.is_phi();
        if is_phi {
            let original = match &f.block(block).insts[ii].ext {
                InstExt::Phi { ssa_var, .. } => VregId(*ssa_var),
                _ => unreachable!(),
            };
            let fresh = fresh_push(f, stacks, pushed, original);
            f.block_mut(block).insts[ii].dest = Operand::Vreg(fresh, None);
            continue;
        }

        for src in f.block_mut(block).insts[ii].sources_mut() {
            if let Operand::Vreg(v, ty) = src {
                if v.0 < pre_ssa_count {
                    if let Some(top) = current_top(stacks, *v) {
                        *src = Operand::Vreg(top, *ty);
                    }
                }
            }
        }

        let dest_vreg = match &f.block(block).insts[ii].dest {
            Operand::Vreg(v, _) if v.0 < pre_ssa_count => Some(*v),
            _ => None,
        };
        if let Some(original) = dest_vreg {
            let fresh = fresh_push(f, stacks, pushed, original);
            let ty = match &f.block(block).insts[ii].dest {
                Operand::Vreg(_, ty) => *ty,
                _ => None,
            };
            f.block_mut(block).insts[ii].dest = Operand::Vreg(fresh, ty);
        }
    }

    let succs = f.block(block).succs.clone();
    for succ in succs {
        let pred_index = match f.block(succ).pred_index(block) {
            Some(i) => i,
            None => continue,
        };
        for phi in f.block_mut(succ).phis_mut() {
            if let InstExt::Phi {
                ssa_var,
                phi_args,
                ..
            } = &mut phi.ext
            {
                let value = current_top(stacks, VregId(*ssa_var))
                    .map(|v| Operand::Vreg(v, None))
                    .unwrap_or(Operand::ImmInt(0));
                phi_args[pred_index] = value;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phi_insertion::insert_phis;
    use cc_analysis::{build_cfg, compute_dominance_frontiers, compute_dominators};
    use cc_ir::{Inst, IrType, Opcode, Operand};

    #[test]
    fn straight_line_function_renames_every_def_to_a_distinct_vreg() {
        let mut f = Function::new("f", vec![("a".into(), IrType::I32)], IrType::I32);
        f.declare_variable("a", IrType::I32, true);
        let x = f.declare_variable("x", IrType::I32, false);
        f.block_mut(f.entry).push(Inst::new(
            Opcode::Add,
            Operand::Vreg(x, None),
            Operand::Vreg(f.variable("a").unwrap().vreg, None),
            Operand::ImmInt(1),
            1,
        ));
        f.block_mut(f.entry)
            .push(Inst::terminator_return(Some(Operand::Vreg(x, None)), 2));

        build_cfg(&mut f);
        compute_dominators(&mut f);
        compute_dominance_frontiers(&mut f);
        insert_phis(&mut f);
        rename(&mut f);

        assert!(f.is_ssa);
        assert_eq!(f.param_entry_versions.len(), 1);
        let add = &f.block(f.entry).insts[0];
        assert_eq!(add.src1, Operand::Vreg(f.param_entry_versions[0], None));
    }

    #[test]
    fn if_then_else_merge_phi_gets_both_arm_values_after_rename() {
        let mut f = Function::new("f", vec![], IrType::I32);
        let then_b = f.new_block("then");
        let else_b = f.new_block("else");
        let merge = f.new_block("merge");
        let v0 = f.declare_variable("x", IrType::I32, false);

        f.block_mut(f.entry).push(Inst::terminator_branch(
            Operand::ImmInt(1),
            then_b,
            else_b,
            0,
        ));
        f.block_mut(then_b).push(Inst::new(
            Opcode::Const,
            Operand::Vreg(v0, None),
            Operand::ImmInt(1),
            Operand::None,
            0,
        ));
        f.block_mut(then_b).push(Inst::terminator_jump(merge, 0));
        f.block_mut(else_b).push(Inst::new(
            Opcode::Const,
            Operand::Vreg(v0, None),
            Operand::ImmInt(2),
            Operand::None,
            0,
        ));
        f.block_mut(else_b).push(Inst::terminator_jump(merge, 0));
        f.block_mut(merge)
            .push(Inst::terminator_return(Some(Operand::Vreg(v0, None)), 0));

        build_cfg(&mut f);
        compute_dominators(&mut f);
        compute_dominance_frontiers(&mut f);
        insert_phis(&mut f);
        rename(&mut f);

        let phi = f.block(merge).phis().next().unwrap();
        if let InstExt::Phi { phi_args, .. } = &phi.ext {
            assert_eq!(phi_args.len(), 2);
            assert!(phi_args.iter().all(|a| matches!(a, Operand::Vreg(_, _))));
        } else {
            panic!("expected phi");
        }
    }
}
