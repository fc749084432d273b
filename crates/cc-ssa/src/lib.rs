//! Turns a function with plain (possibly multiply-assigned) vregs into
//! SSA form: iterated-dominance-frontier phi insertion followed by
//! dominator-tree-DFS renaming. Requires `cc_analysis::compute_dominators`
//! and `cc_analysis::compute_dominance_frontiers` to have already run.

pub mod phi_insertion;
pub mod rename;

pub use phi_insertion::insert_phis;
pub use rename::rename;

use cc_ir::Function;

/// Runs phi insertion then renaming, unless `f` is already in SSA form —
/// construction is idempotent: calling it again on an already-SSA
/// function is a no-op, matching the "run SSA construction twice -> the
/// second run is a no-op" testable property.
pub fn construct_ssa(f: &mut Function) {
    if f.is_ssa {
        return;
    }
    log::debug!("constructing SSA for `{}`", f.name);
    insert_phis(f);
    rename(f);
}
