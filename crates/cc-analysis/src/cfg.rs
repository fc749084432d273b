//! Derives predecessor/successor edges from each block's terminator.
//! Blocks whose last instruction isn't a terminator fall through to the
//! next block by id, matching how the builder lays out straight-line
//! dead code after an unconditional jump.

use cc_ir::{BlockId, Function};

pub fn build_cfg(f: &mut Function) {
    for block in &mut f.blocks {
        block.preds.clear();
        block.succs.clear();
    }

    let n = f.blocks.len();
    let mut edges: Vec<(BlockId, Vec<BlockId>)> = Vec::with_capacity(n);
    for block in &f.blocks {
        let succs: Vec<BlockId> = match block.insts.last() {
            Some(last) if last.opcode.is_terminator() => last.targets().into_vec(),
            _ => {
                let next = BlockId(block.id.0 + 1);
                if next.index() < n {
                    vec![next]
                } else {
                    vec![]
                }
            }
        };
        edges.push((block.id, succs));
    }

    for (from, succs) in &edges {
        f.block_mut(*from).succs = succs.clone().into();
    }
    for (from, succs) in edges {
        for to in succs {
            if !f.block(to).preds.contains(&from) {
                f.block_mut(to).preds.push(from);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cc_ir::{IrType, Operand};

    #[test]
    fn jump_creates_symmetric_edge() {
        let mut f = Function::new("f", vec![], IrType::I32);
        let b1 = f.new_block("b1");
        f.block_mut(f.entry)
            .push(cc_ir::Inst::terminator_jump(b1, 0));
        f.block_mut(b1).push(cc_ir::Inst::terminator_return(None, 0));
        build_cfg(&mut f);
        assert_eq!(f.block(f.entry).succs.as_slice(), &[b1]);
        assert_eq!(f.block(b1).preds.as_slice(), &[f.entry]);
    }

    #[test]
    fn branch_creates_two_successors_in_order() {
        let mut f = Function::new("f", vec![], IrType::I32);
        let t = f.new_block("t");
        let e = f.new_block("e");
        f.block_mut(f.entry).push(cc_ir::Inst::terminator_branch(
            Operand::ImmInt(1),
            t,
            e,
            0,
        ));
        f.block_mut(t).push(cc_ir::Inst::terminator_return(None, 0));
        f.block_mut(e).push(cc_ir::Inst::terminator_return(None, 0));
        build_cfg(&mut f);
        assert_eq!(f.block(f.entry).succs.as_slice(), &[t, e]);
    }

    #[test]
    fn non_terminator_last_instruction_falls_through() {
        let mut f = Function::new("f", vec![], IrType::I32);
        let b1 = f.new_block("b1");
        f.block_mut(f.entry).push(cc_ir::Inst::new(
            cc_ir::Opcode::Nop,
            Operand::None,
            Operand::None,
            Operand::None,
            0,
        ));
        f.block_mut(b1).push(cc_ir::Inst::terminator_return(None, 0));
        build_cfg(&mut f);
        assert_eq!(f.block(f.entry).succs.as_slice(), &[b1]);
    }

    #[test]
    fn return_has_no_successors() {
        let mut f = Function::new("f", vec![], IrType::I32);
        f.block_mut(f.entry)
            .push(cc_ir::Inst::terminator_return(None, 0));
        build_cfg(&mut f);
        assert!(f.block(f.entry).succs.is_empty());
    }
}
