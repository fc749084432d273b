//! Iterated-dominance-frontier phi placement. Runs on the pre-rename IR,
//! where a "variable" is simply a vreg id that may be redefined by more
//! than one instruction (the builder reuses a canonical vreg for every
//! assignment to the same source variable).

use cc_ir::{BlockId, Function, Inst, VregId};
use std::collections::{HashMap, HashSet};

fn defining_blocks(f: &Function) -> HashMap<VregId, HashSet<BlockId>> {
    let mut defs: HashMap<VregId, HashSet<BlockId>> = HashMap::new();
    for block in &f.blocks {
        for inst in &block.insts {
            if let Some(v) = inst.dest.vreg() {
                defs.entry(v).or_default().insert(block.id);
            }
        }
    }
    defs
}

/// Inserts phi instructions at the head of every block in the iterated
/// dominance frontier of each vreg's defining blocks. Requires
/// `cc_analysis::compute_dominance_frontiers` to have already run.
pub fn insert_phis(f: &mut Function) {
    let defs = defining_blocks(f);
    let mut has_phi_for: HashSet<(BlockId, u32)> = HashSet::new();

    for (&v, def_blocks) in &defs {
        let mut worklist: Vec<BlockId> = def_blocks.iter().copied().collect();
        let mut on_worklist: HashSet<BlockId> = worklist.iter().copied().collect();

        while let Some(d) = worklist.pop() {
            on_worklist.remove(&d);
            let frontier = f.block(d).dom_frontier.clone();
            for y in frontier {
                if has_phi_for.insert((y, v.0)) {
                    let preds = f.block(y).preds.to_vec();
                    let phi = Inst::phi(v, v.0, preds, 0);
                    let insert_at = f.block(y).phis().count();
                    f.block_mut(y).insts.insert(insert_at, phi);
                    if on_worklist.insert(y) {
                        worklist.push(y);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cc_analysis::{build_cfg, compute_dominance_frontiers, compute_dominators};
    use cc_ir::{IrType, Opcode, Operand};

    // entry -> then/else -> merge -> return, with `v0` assigned in both
    // then and else.
    fn diamond_with_assignment() -> Function {
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
        f
    }

    #[test]
    fn a_variable_assigned_on_both_arms_gets_one_phi_at_the_merge() {
        let mut f = diamond_with_assignment();
        insert_phis(&mut f);
        let merge = BlockId(3);
        assert_eq!(f.block(merge).phis().count(), 1);
    }

    #[test]
    fn inserted_phi_has_one_argument_slot_per_predecessor() {
        let mut f = diamond_with_assignment();
        insert_phis(&mut f);
        let merge = BlockId(3);
        let phi = f.block(merge).phis().next().unwrap();
        if let cc_ir::InstExt::Phi { phi_args, phi_preds, .. } = &phi.ext {
            assert_eq!(phi_args.len(), f.block(merge).preds.len());
            assert_eq!(phi_preds, &f.block(merge).preds.to_vec());
        } else {
            panic!("expected a Phi instruction");
        }
    }

    #[test]
    fn a_variable_assigned_in_only_one_block_gets_no_phi() {
        let mut f = Function::new("f", vec![], IrType::I32);
        let v0 = f.declare_variable("x", IrType::I32, false);
        f.block_mut(f.entry).push(Inst::new(
            Opcode::Const,
            Operand::Vreg(v0, None),
            Operand::ImmInt(1),
            Operand::None,
            0,
        ));
        f.block_mut(f.entry)
            .push(Inst::terminator_return(Some(Operand::Vreg(v0, None)), 0));
        build_cfg(&mut f);
        compute_dominators(&mut f);
        compute_dominance_frontiers(&mut f);
        insert_phis(&mut f);
        assert_eq!(f.block(f.entry).phis().count(), 0);
    }
}
