//! Natural-loop detection via back edges. Requires `cfg::build_cfg` and
//! `dominance::compute_dominators` to have already run.

use crate::dominance::dominates;
use cc_ir::{BlockId, Function};
use std::collections::HashSet;

pub struct Loop {
    pub header: BlockId,
    pub body: Vec<BlockId>,
}

/// Finds every back edge `b -> h` where `h` dominates `b`, then computes
/// each one's natural-loop body: `h` plus every block that can reach `b`
/// by walking predecessors without passing through `h`.
pub fn find_loops(f: &Function) -> Vec<Loop> {
    let mut loops = Vec::new();
    for block in &f.blocks {
        for &succ in &block.succs {
            if dominates(f, succ, block.id) {
                loops.push(natural_loop(f, succ, block.id));
            }
        }
    }
    loops
}

fn natural_loop(f: &Function, header: BlockId, tail: BlockId) -> Loop {
    let mut body: HashSet<BlockId> = HashSet::new();
    body.insert(header);
    body.insert(tail);
    let mut worklist = vec![tail];
    while let Some(b) = worklist.pop() {
        if b == header {
            continue;
        }
        for &p in &f.block(b).preds {
            if body.insert(p) {
                worklist.push(p);
            }
        }
    }
    let mut body: Vec<_> = body.into_iter().collect();
    body.sort_by_key(|b| b.0);
    Loop { header, body }
}

/// Annotates every block's `loop_header`/`loop_depth`. When loops are
/// nested, the innermost header wins: loops are applied largest-body
/// first so a smaller, nested loop's assignment overwrites its enclosing
/// loop's.
pub fn annotate_loops(f: &mut Function) {
    for block in &mut f.blocks {
        block.loop_header = None;
        block.loop_depth = 0;
    }

    let mut loops = find_loops(f);
    loops.sort_by_key(|l| std::cmp::Reverse(l.body.len()));

    for lp in &loops {
        for &b in &lp.body {
            f.block_mut(b).loop_depth += 1;
            f.block_mut(b).loop_header = Some(lp.header);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfg::build_cfg;
    use crate::dominance::compute_dominators;
    use cc_ir::{Inst, IrType, Operand};

    // entry -> header -> body -> header (back edge) ; header -> exit
    fn simple_loop() -> Function {
        let mut f = Function::new("f", vec![], IrType::I32);
        let header = f.new_block("header");
        let body = f.new_block("body");
        let exit = f.new_block("exit");
        f.block_mut(f.entry).push(Inst::terminator_jump(header, 0));
        f.block_mut(header)
            .push(Inst::terminator_branch(Operand::ImmInt(1), body, exit, 0));
        f.block_mut(body).push(Inst::terminator_jump(header, 0));
        f.block_mut(exit).push(Inst::terminator_return(None, 0));
        build_cfg(&mut f);
        compute_dominators(&mut f);
        f
    }

    #[test]
    fn back_edge_is_detected_from_body_to_header() {
        let f = simple_loop();
        let loops = find_loops(&f);
        assert_eq!(loops.len(), 1);
        assert_eq!(loops[0].header, BlockId(1));
        assert!(loops[0].body.contains(&BlockId(1)));
        assert!(loops[0].body.contains(&BlockId(2)));
    }

    #[test]
    fn exit_block_is_not_part_of_the_loop_body() {
        let f = simple_loop();
        let loops = find_loops(&f);
        assert!(!loops[0].body.contains(&BlockId(3)));
    }

    #[test]
    fn blocks_in_the_loop_body_get_loop_header_and_depth_set() {
        let mut f = simple_loop();
        annotate_loops(&mut f);
        let header = BlockId(1);
        let body = BlockId(2);
        let exit = BlockId(3);
        assert_eq!(f.block(header).loop_header, Some(header));
        assert_eq!(f.block(header).loop_depth, 1);
        assert_eq!(f.block(body).loop_header, Some(header));
        assert_eq!(f.block(exit).loop_depth, 0);
    }

    #[test]
    fn nested_loop_header_wins_over_its_enclosing_loop() {
        // entry -> outer -> inner -> inner (back edge) -> outer (back edge) -> exit
        let mut f = Function::new("f", vec![], IrType::I32);
        let outer = f.new_block("outer");
        let inner = f.new_block("inner");
        let exit = f.new_block("exit");
        f.block_mut(f.entry).push(Inst::terminator_jump(outer, 0));
        f.block_mut(outer)
            .push(Inst::terminator_branch(Operand::ImmInt(1), inner, exit, 0));
        f.block_mut(inner)
            .push(Inst::terminator_branch(Operand::ImmInt(1), inner, outer, 0));
        f.block_mut(exit).push(Inst::terminator_return(None, 0));
        build_cfg(&mut f);
        compute_dominators(&mut f);

        annotate_loops(&mut f);
        assert_eq!(f.block(inner).loop_header, Some(inner));
        assert_eq!(f.block(inner).loop_depth, 2);
        assert_eq!(f.block(outer).loop_header, Some(outer));
        assert_eq!(f.block(outer).loop_depth, 1);
    }
}
