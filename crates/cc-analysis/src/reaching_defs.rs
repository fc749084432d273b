//! Forward reaching-definitions, over definition *sites* rather than over
//! vregs: a pre-SSA vreg can be assigned more than once (each surface
//! assignment to the same variable reuses its canonical vreg), so a def
//! site is identified by `(block, instruction index)`, not by vreg alone.

use cc_common::Bitset;
use cc_ir::{BlockId, Function, VregId};
use std::collections::HashMap;

/// One assignment to a vreg, located by block and instruction index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DefSite {
    pub vreg: VregId,
    pub block: BlockId,
    pub inst_index: usize,
}

pub struct ReachingDefs {
    pub sites: Vec<DefSite>,
    pub reach_in: Vec<Bitset>,
    pub reach_out: Vec<Bitset>,
}

impl ReachingDefs {
    /// Definition sites reaching the start of `block`.
    pub fn reaching_at_entry(&self, block: BlockId) -> impl Iterator<Item = &DefSite> + '_ {
        self.reach_in[block.index()]
            .iter()
            .map(move |id| &self.sites[id])
    }
}

/// Computes reaching definitions for `f`. Requires `cfg::build_cfg` to
/// have already populated `preds`/`succs`.
pub fn compute_reaching_definitions(f: &Function) -> ReachingDefs {
    let mut sites = Vec::new();
    let mut sites_by_vreg: HashMap<VregId, Vec<usize>> = HashMap::new();
    let mut site_id_of: HashMap<(BlockId, usize), usize> = HashMap::new();
    for block in &f.blocks {
        for (ii, inst) in block.insts.iter().enumerate() {
            if let Some(v) = inst.dest.vreg() {
                let id = sites.len();
                sites.push(DefSite {
                    vreg: v,
                    block: block.id,
                    inst_index: ii,
                });
                sites_by_vreg.entry(v).or_default().push(id);
                site_id_of.insert((block.id, ii), id);
            }
        }
    }

    let n = f.blocks.len();
    let universe = sites.len();
    let mut gen = vec![Bitset::new(universe); n];
    let mut kill = vec![Bitset::new(universe); n];

    for block in &f.blocks {
        let bi = block.id.index();
        let mut last_def_of: HashMap<VregId, usize> = HashMap::new();
        for (ii, inst) in block.insts.iter().enumerate() {
            if let Some(v) = inst.dest.vreg() {
                let site_id = site_id_of[&(block.id, ii)];
                last_def_of.insert(v, site_id);
            }
        }
        for (&v, &local_site) in &last_def_of {
            gen[bi].set(local_site);
            for &other in &sites_by_vreg[&v] {
                if other != local_site {
                    kill[bi].set(other);
                }
            }
        }
    }

    let mut reach_in = vec![Bitset::new(universe); n];
    let mut reach_out = vec![Bitset::new(universe); n];
    let order: Vec<_> = f.block_ids().collect();
    let mut changed = true;
    while changed {
        changed = false;
        for &b in &order {
            let bi = b.index();
            let mut new_in = Bitset::new(universe);
            for &pred in &f.block(b).preds {
                new_in.union_with(&reach_out[pred.index()]);
            }
            if reach_in[bi] != new_in {
                reach_in[bi] = new_in.clone();
                changed = true;
            }

            let mut new_out = new_in;
            new_out.difference_with(&kill[bi]);
            new_out.union_with(&gen[bi]);
            if reach_out[bi] != new_out {
                reach_out[bi] = new_out;
                changed = true;
            }
        }
    }

    ReachingDefs {
        sites,
        reach_in,
        reach_out,
    }
}
