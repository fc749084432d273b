//! Backward liveness over vreg ids, with the SSA-correct treatment of phi
//! arguments: a phi argument is a use in the *predecessor* block that
//! supplies it, never a use in the phi's own block.

use cc_common::Bitset;
use cc_ir::{Function, InstExt, Operand};

fn local_def_use(f: &mut Function) {
    let universe = f.vreg_count() as usize;
    for bi in 0..f.blocks.len() {
        let mut def = Bitset::new(universe);
        let mut use_ = Bitset::new(universe);
        let insts_len = f.blocks[bi].insts.len();
        for ii in 0..insts_len {
            let (sources, dest) = {
                let inst = &f.blocks[bi].insts[ii];
                if inst.opcode.is_phi() {
                    (Vec::new(), inst.dest.vreg())
                } else {
                    let sources: Vec<_> = inst.sources().iter().filter_map(|o| o.vreg()).collect();
                    (sources, inst.dest.vreg())
                }
            };
            for v in sources {
                if !def.test(v.0 as usize) {
                    use_.set(v.0 as usize);
                }
            }
            if let Some(d) = dest {
                def.set(d.0 as usize);
            }
        }
        f.blocks[bi].def = def;
        f.blocks[bi].use_ = use_;
    }

    // Parameters are implicitly defined at function entry.
    let entry = f.entry.index();
    for v in f.param_entry_versions.clone() {
        f.blocks[entry].def.set(v.0 as usize);
    }
}

fn phi_uses_in_predecessors(f: &mut Function) {
    let n = f.blocks.len();
    let mut extra_uses: Vec<Vec<Operand>> = vec![Vec::new(); n];
    for block in &f.blocks {
        for phi in block.phis() {
            if let InstExt::Phi {
                phi_args,
                phi_preds,
                ..
            } = &phi.ext
            {
                for (arg, &pred) in phi_args.iter().zip(phi_preds.iter()) {
                    extra_uses[pred.index()].push(arg.clone());
                }
            }
        }
    }
    for (bi, uses) in extra_uses.into_iter().enumerate() {
        for op in uses {
            if let Some(v) = op.vreg() {
                f.blocks[bi].use_.set(v.0 as usize);
            }
        }
    }
}

/// Computes `def`/`use`/`live_in`/`live_out` for every block, storing
/// them directly on [`cc_ir::Block`]. Requires `cfg::build_cfg` to have
/// already populated `preds`/`succs`.
pub fn compute_liveness(f: &mut Function) {
    local_def_use(f);
    phi_uses_in_predecessors(f);

    let universe = f.vreg_count() as usize;
    for b in &mut f.blocks {
        b.live_in = Bitset::new(universe);
        b.live_out = Bitset::new(universe);
    }

    let order: Vec<_> = f.block_ids().rev().collect();
    let mut changed = true;
    while changed {
        changed = false;
        for &b in &order {
            let succs = f.block(b).succs.clone();
            let mut live_out = Bitset::new(universe);
            for succ in succs {
                live_out.union_with(&f.block(succ).live_in);
            }
            if f.block(b).live_out != live_out {
                f.block_mut(b).live_out = live_out.clone();
                changed = true;
            }

            let mut live_in = live_out;
            live_in.difference_with(&f.block(b).def);
            live_in.union_with(&f.block(b).use_);
            if f.block(b).live_in != live_in {
                f.block_mut(b).live_in = live_in;
                changed = true;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfg::build_cfg;
    use cc_ir::{Inst, IrType, Opcode, Operand, VregId};

    #[test]
    fn value_defined_and_used_in_same_block_is_not_live_out() {
        let mut f = Function::new("f", vec![], IrType::I32);
        let v0 = VregId(0);
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
        compute_liveness(&mut f);
        assert!(f.block(f.entry).live_out.is_empty());
    }

    #[test]
    fn value_live_across_a_block_boundary_is_live_out_of_the_definer() {
        let mut f = Function::new("f", vec![], IrType::I32);
        let b1 = f.new_block("b1");
        let v0 = VregId(0);
        f.block_mut(f.entry).push(Inst::new(
            Opcode::Const,
            Operand::Vreg(v0, None),
            Operand::ImmInt(1),
            Operand::None,
            0,
        ));
        f.block_mut(f.entry).push(Inst::terminator_jump(b1, 0));
        f.block_mut(b1)
            .push(Inst::terminator_return(Some(Operand::Vreg(v0, None)), 0));
        build_cfg(&mut f);
        compute_liveness(&mut f);
        assert!(f.block(f.entry).live_out.test(0));
        assert!(f.block(b1).live_in.test(0));
    }

    #[test]
    fn phi_argument_is_a_use_in_the_predecessor_not_the_merge_block() {
        let mut f = Function::new("f", vec![], IrType::I32);
        let pred = f.new_block("pred");
        let merge = f.new_block("merge");
        let v_arg = VregId(0);
        f.block_mut(f.entry).push(Inst::terminator_jump(pred, 0));
        f.block_mut(pred).push(Inst::new(
            Opcode::Const,
            Operand::Vreg(v_arg, None),
            Operand::ImmInt(7),
            Operand::None,
            0,
        ));
        f.block_mut(pred).push(Inst::terminator_jump(merge, 0));
        let mut phi = Inst::phi(VregId(1), 0, vec![pred], 0);
        if let InstExt::Phi { phi_args, .. } = &mut phi.ext {
            phi_args[0] = Operand::Vreg(v_arg, None);
        }
        f.block_mut(merge).push(phi);
        f.block_mut(merge)
            .push(Inst::terminator_return(Some(Operand::Vreg(VregId(1), None)), 0));
        build_cfg(&mut f);
        compute_liveness(&mut f);
        assert!(f.block(pred).use_.test(v_arg.0 as usize));
        assert!(!f.block(merge).use_.test(v_arg.0 as usize));
    }
}
