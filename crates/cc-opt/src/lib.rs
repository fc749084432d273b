//! The three global optimization passes over SSA IR: sparse conditional
//! constant propagation (`sccp`), dominator-scoped value numbering and
//! common-subexpression elimination (`gvn`), and loop-invariant code
//! motion (`licm`). Each module runs independently; [`optimize`] chains
//! them in the order given by the pipeline (SCCP, then GVN, then LICM),
//! since constant folding exposes redundant expressions for GVN to
//! merge, and GVN's copy-propagation in turn simplifies LICM's
//! invariance test.

pub mod gvn;
pub mod licm;
pub mod sccp;

pub use gvn::gvn;
pub use licm::licm;
pub use sccp::sccp;

use cc_ir::Function;

/// Runs SCCP, then GVN/CSE, then LICM, once each, over `f`. Requires
/// `cc_analysis::compute_dominators`/`compute_dominance_frontiers` and
/// `cc_ssa::construct_ssa` to have already run.
pub fn optimize(f: &mut Function) {
    sccp(f);
    gvn(f);
    licm(f);
}
