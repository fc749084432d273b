//! A basic block: an arena-style instruction list (indexed by position
//! rather than a hand-rolled linked list) plus the predecessor/successor
//! edges and analysis slots the later passes fill in.

use crate::inst::Inst;
use crate::operand::BlockId;
use cc_common::Bitset;
use smallvec::SmallVec;

/// Small-vec inline capacity for predecessor/successor lists: most blocks
/// have at most two of either.
pub type BlockIdVec = SmallVec<[BlockId; 2]>;

#[derive(Debug, Clone, Default)]
pub struct Block {
    pub id: BlockId,
    pub label: String,
    pub insts: Vec<Inst>,

    pub preds: BlockIdVec,
    pub succs: BlockIdVec,

    // --- analysis slots, populated by cc-analysis / cc-ssa ---
    pub idom: Option<BlockId>,
    pub dom_frontier: Vec<BlockId>,
    pub loop_header: Option<BlockId>,
    pub loop_depth: u32,

    pub live_in: Bitset,
    pub live_out: Bitset,
    pub def: Bitset,
    pub use_: Bitset,
}

impl Block {
    pub fn new(id: BlockId, label: impl Into<String>) -> Self {
        Self {
            id,
            label: label.into(),
            ..Default::default()
        }
    }

    pub fn push(&mut self, inst: Inst) {
        self.insts.push(inst);
    }

    /// The block's single terminator, which must be its last instruction.
    pub fn terminator(&self) -> Option<&Inst> {
        self.insts.last().filter(|i| i.opcode.is_terminator())
    }

    pub fn terminator_mut(&mut self) -> Option<&mut Inst> {
        if self.insts.last().is_some_and(|i| i.opcode.is_terminator()) {
            self.insts.last_mut()
        } else {
            None
        }
    }

    pub fn has_terminator(&self) -> bool {
        self.terminator().is_some()
    }

    /// Phi instructions at the head of the block, in insertion order.
    pub fn phis(&self) -> impl Iterator<Item = &Inst> {
        self.insts.iter().take_while(|i| i.opcode.is_phi())
    }

    pub fn phis_mut(&mut self) -> impl Iterator<Item = &mut Inst> {
        self.insts.iter_mut().take_while(|i| i.opcode.is_phi())
    }

    pub fn pred_index(&self, pred: BlockId) -> Option<usize> {
        self.preds.iter().position(|&p| p == pred)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operand::Operand;

    #[test]
    fn terminator_must_be_last_instruction() {
        let mut b = Block::new(BlockId(0), "entry");
        assert!(b.terminator().is_none());
        b.push(Inst::new(
            crate::opcode::Opcode::Nop,
            Operand::None,
            Operand::None,
            Operand::None,
            1,
        ));
        assert!(b.terminator().is_none());
        b.push(Inst::terminator_jump(BlockId(1), 2));
        assert!(b.terminator().is_some());
    }

    #[test]
    fn phis_iterator_stops_at_first_non_phi() {
        let mut b = Block::new(BlockId(0), "merge");
        b.push(Inst::phi(crate::operand::VregId(0), 0, vec![], 0));
        b.push(Inst::phi(crate::operand::VregId(1), 1, vec![], 0));
        b.push(Inst::new(
            crate::opcode::Opcode::Add,
            Operand::None,
            Operand::None,
            Operand::None,
            0,
        ));
        assert_eq!(b.phis().count(), 2);
    }
}
