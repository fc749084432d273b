//! The Cooper-Harvey-Kennedy iterative dominator algorithm plus the
//! standard semi-pruned dominance-frontier construction. Requires
//! `cfg::build_cfg` to have already populated `preds`/`succs`.

use cc_ir::{BlockId, Function};

/// Computes reverse postorder from `entry` by DFS. Unreachable blocks get
/// rpo index `-1` and are excluded from the returned order.
fn reverse_postorder(f: &Function) -> (Vec<BlockId>, Vec<i32>) {
    let n = f.blocks.len();
    let mut visited = vec![false; n];
    let mut postorder = Vec::with_capacity(n);
    let mut stack: Vec<(BlockId, usize)> = vec![(f.entry, 0)];
    visited[f.entry.index()] = true;

    while let Some((block, next_succ)) = stack.pop() {
        let succs = &f.block(block).succs;
        if next_succ < succs.len() {
            stack.push((block, next_succ + 1));
            let succ = succs[next_succ];
            if !visited[succ.index()] {
                visited[succ.index()] = true;
                stack.push((succ, 0));
            }
        } else {
            postorder.push(block);
        }
    }

    let mut rpo = postorder;
    rpo.reverse();
    let mut rpo_index = vec![-1i32; n];
    for (i, &b) in rpo.iter().enumerate() {
        rpo_index[b.index()] = i as i32;
    }
    (rpo, rpo_index)
}

/// Computes the immediate dominator of every reachable block and stores
/// it in `block.idom`. `idom[entry]` is left as `None` (sentinel: entry
/// has no parent).
pub fn compute_dominators(f: &mut Function) {
    let (rpo, rpo_index) = reverse_postorder(f);
    let n = f.blocks.len();
    let mut idom: Vec<Option<BlockId>> = vec![None; n];
    idom[f.entry.index()] = Some(f.entry);

    let intersect = |idom: &[Option<BlockId>], rpo_index: &[i32], mut a: BlockId, mut b: BlockId| -> BlockId {
        while a != b {
            while rpo_index[a.index()] > rpo_index[b.index()] {
                a = idom[a.index()].expect("processed predecessor must have an idom");
            }
            while rpo_index[b.index()] > rpo_index[a.index()] {
                b = idom[b.index()].expect("processed predecessor must have an idom");
            }
        }
        a
    };

    let mut changed = true;
    while changed {
        changed = false;
        for &b in rpo.iter().skip(1) {
            let preds = f.block(b).preds.clone();
            let mut new_idom: Option<BlockId> = None;
            for p in preds {
                if idom[p.index()].is_none() {
                    continue;
                }
                new_idom = Some(match new_idom {
                    None => p,
                    Some(cur) => intersect(&idom, &rpo_index, cur, p),
                });
            }
            if new_idom.is_some() && new_idom != idom[b.index()] {
                idom[b.index()] = new_idom;
                changed = true;
            }
        }
    }

    for block in &mut f.blocks {
        block.idom = idom[block.id.index()];
    }
    f.block_mut(f.entry).idom = None;
}

/// Builds a parent-indexed children map from the idom array: one entry
/// per block, the ids of blocks it immediately dominates.
pub fn dominator_tree_children(f: &Function) -> Vec<Vec<BlockId>> {
    let mut children = vec![Vec::new(); f.blocks.len()];
    for block in &f.blocks {
        if let Some(idom) = block.idom {
            if idom != block.id {
                children[idom.index()].push(block.id);
            }
        }
    }
    children
}

/// Standard dominance-frontier construction: for each join point `b`
/// (>=2 predecessors), walk each predecessor's idom chain up to (but not
/// including) `b`'s idom, adding `b` to every block visited.
pub fn compute_dominance_frontiers(f: &mut Function) {
    for block in &mut f.blocks {
        block.dom_frontier.clear();
    }
    let preds_by_block: Vec<(BlockId, Vec<BlockId>)> = f
        .blocks
        .iter()
        .map(|b| (b.id, b.preds.to_vec()))
        .collect();

    for (b, preds) in preds_by_block {
        if preds.len() < 2 {
            continue;
        }
        let b_idom = f.block(b).idom;
        for p in preds {
            let mut runner = Some(p);
            while let Some(r) = runner {
                if Some(r) == b_idom {
                    break;
                }
                let frontier = &mut f.block_mut(r).dom_frontier;
                if !frontier.contains(&b) {
                    frontier.push(b);
                }
                runner = f.block(r).idom;
            }
        }
    }
}

/// `a` dominates `b` if `a == b` or `a` appears on `b`'s idom chain.
pub fn dominates(f: &Function, a: BlockId, b: BlockId) -> bool {
    let mut cur = b;
    loop {
        if cur == a {
            return true;
        }
        match f.block(cur).idom {
            Some(parent) if parent != cur => cur = parent,
            _ => return cur == a,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfg::build_cfg;
    use cc_ir::{IrType, Operand};

    // entry -> then, else; then -> merge; else -> merge; merge -> (return)
    fn diamond() -> Function {
        let mut f = Function::new("f", vec![], IrType::I32);
        let then_b = f.new_block("then");
        let else_b = f.new_block("else");
        let merge = f.new_block("merge");
        f.block_mut(f.entry).push(cc_ir::Inst::terminator_branch(
            Operand::ImmInt(1),
            then_b,
            else_b,
            0,
        ));
        f.block_mut(then_b).push(cc_ir::Inst::terminator_jump(merge, 0));
        f.block_mut(else_b).push(cc_ir::Inst::terminator_jump(merge, 0));
        f.block_mut(merge)
            .push(cc_ir::Inst::terminator_return(None, 0));
        build_cfg(&mut f);
        f
    }

    #[test]
    fn entry_dominates_everything() {
        let mut f = diamond();
        compute_dominators(&mut f);
        for b in f.block_ids() {
            assert!(dominates(&f, f.entry, b));
        }
        assert!(f.block(f.entry).idom.is_none());
    }

    #[test]
    fn merge_block_idom_is_entry_not_then_or_else() {
        let mut f = diamond();
        compute_dominators(&mut f);
        let merge = BlockId(3);
        assert_eq!(f.block(merge).idom, Some(f.entry));
    }

    #[test]
    fn merge_is_in_dominance_frontier_of_then_and_else() {
        let mut f = diamond();
        compute_dominators(&mut f);
        compute_dominance_frontiers(&mut f);
        let then_b = BlockId(1);
        let else_b = BlockId(2);
        let merge = BlockId(3);
        assert_eq!(f.block(then_b).dom_frontier, vec![merge]);
        assert_eq!(f.block(else_b).dom_frontier, vec![merge]);
    }

    #[test]
    fn dominance_frontier_never_contains_a_strictly_dominated_block() {
        let mut f = diamond();
        compute_dominators(&mut f);
        compute_dominance_frontiers(&mut f);
        for block in &f.blocks {
            for &df in &block.dom_frontier {
                assert!(!dominates(&f, block.id, df) || block.id == df);
            }
        }
    }
}
