//! CFG derivation, dominator tree/frontiers, liveness, reaching
//! definitions, and natural-loop detection. Each analysis is a free
//! function operating on a [`cc_ir::Function`]; dominance and loop
//! results are written back onto [`cc_ir::Block`], while liveness writes
//! `live_in`/`live_out`/`def`/`use` and reaching definitions is returned
//! as a standalone [`reaching_defs::ReachingDefs`] value.

pub mod cfg;
pub mod dominance;
pub mod liveness;
pub mod loops;
pub mod reaching_defs;

pub use cfg::build_cfg;
pub use dominance::{compute_dominance_frontiers, compute_dominators, dominates, dominator_tree_children};
pub use liveness::compute_liveness;
pub use loops::{annotate_loops, find_loops, Loop};
pub use reaching_defs::{compute_reaching_definitions, DefSite, ReachingDefs};

/// Runs every analysis that downstream passes (SSA construction,
/// optimization, register allocation) expect to already be populated:
/// CFG edges, dominator tree, dominance frontiers, loops, and liveness.
pub fn analyze(f: &mut cc_ir::Function) {
    build_cfg(f);
    compute_dominators(f);
    compute_dominance_frontiers(f);
    annotate_loops(f);
    compute_liveness(f);
}

#[cfg(test)]
mod tests {
    use super::*;
    use cc_ir::{Function, Inst, IrType, Operand};

    #[test]
    fn analyze_populates_every_analysis_slot_on_a_straight_line_function() {
        let mut f = Function::new("f", vec![], IrType::I32);
        f.block_mut(f.entry)
            .push(Inst::terminator_return(Some(Operand::ImmInt(0)), 0));
        analyze(&mut f);
        assert!(f.block(f.entry).idom.is_none());
        assert!(f.block(f.entry).dom_frontier.is_empty());
        assert_eq!(f.block(f.entry).loop_depth, 0);
    }
}
