//! A three-address instruction: opcode, destination, two source operands,
//! a source line, plus a small per-opcode extension for the handful of
//! instructions that need more than two sources (`branch`, `switch`,
//! `phi`, `call`).

use crate::operand::{BlockId, Operand, VregId};
use crate::opcode::Opcode;
use smallvec::SmallVec;

#[derive(Debug, Clone, PartialEq)]
pub enum InstExt {
    None,
    /// `branch`: `src1` holds the condition, `src2` the true-target label;
    /// the false target lives here since a plain `Instruction` only has
    /// room for two sources.
    Branch { false_target: BlockId },
    /// `switch`: `src1` holds the scrutinee.
    Switch {
        cases: Vec<(i64, BlockId)>,
        default: BlockId,
    },
    /// `phi`: one argument per predecessor, `phi_preds[i]` names the
    /// predecessor `phi_args[i]` comes from.
    Phi {
        ssa_var: u32,
        phi_args: Vec<Operand>,
        phi_preds: Vec<BlockId>,
    },
    /// `call`: argument count; the actual argument values were pushed by
    /// preceding `param` instructions in the same block.
    Call { nargs: u32 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Inst {
    pub opcode: Opcode,
    pub dest: Operand,
    pub src1: Operand,
    pub src2: Operand,
    pub line: u32,
    pub ext: InstExt,
}

impl Inst {
    pub fn new(opcode: Opcode, dest: Operand, src1: Operand, src2: Operand, line: u32) -> Self {
        Self {
            opcode,
            dest,
            src1,
            src2,
            line,
            ext: InstExt::None,
        }
    }

    pub fn terminator_jump(target: BlockId, line: u32) -> Self {
        Self::new(Opcode::Jump, Operand::None, Operand::Label(target), Operand::None, line)
    }

    pub fn terminator_branch(cond: Operand, true_target: BlockId, false_target: BlockId, line: u32) -> Self {
        Self {
            opcode: Opcode::Branch,
            dest: Operand::None,
            src1: cond,
            src2: Operand::Label(true_target),
            line,
            ext: InstExt::Branch { false_target },
        }
    }

    pub fn terminator_return(value: Option<Operand>, line: u32) -> Self {
        Self::new(
            Opcode::Return,
            Operand::None,
            value.unwrap_or(Operand::None),
            Operand::None,
            line,
        )
    }

    pub fn terminator_switch(value: Operand, cases: Vec<(i64, BlockId)>, default: BlockId, line: u32) -> Self {
        Self {
            opcode: Opcode::Switch,
            dest: Operand::None,
            src1: value,
            src2: Operand::None,
            line,
            ext: InstExt::Switch { cases, default },
        }
    }

    pub fn phi(dest: VregId, ssa_var: u32, phi_preds: Vec<BlockId>, line: u32) -> Self {
        let n = phi_preds.len();
        Self {
            opcode: Opcode::Phi,
            dest: Operand::Vreg(dest, None),
            src1: Operand::None,
            src2: Operand::None,
            line,
            ext: InstExt::Phi {
                ssa_var,
                phi_args: vec![Operand::ImmInt(0); n],
                phi_preds,
            },
        }
    }

    pub fn call(dest: Operand, callee: String, nargs: u32, line: u32) -> Self {
        Self {
            opcode: Opcode::Call,
            dest,
            src1: Operand::FuncRef(callee),
            src2: Operand::None,
            line,
            ext: InstExt::Call { nargs },
        }
    }

    /// All source operands this instruction reads, including phi arguments
    /// but not including jump/branch/switch block-label targets (those are
    /// control-flow edges, not value uses — see [`Inst::targets`]).
    pub fn sources(&self) -> SmallVec<[&Operand; 4]> {
        let mut v = SmallVec::new();
        match &self.ext {
            InstExt::Phi { phi_args, .. } => {
                for a in phi_args {
                    v.push(a);
                }
                return v;
            }
            InstExt::Branch { .. } => {
                // src1 is the condition; src2 is a target label, not a value use.
                v.push(&self.src1);
                return v;
            }
            InstExt::Switch { .. } => {
                v.push(&self.src1);
                return v;
            }
            _ => {}
        }
        if !self.src1.is_none() && !matches!(self.src1, Operand::Label(_)) {
            v.push(&self.src1);
        }
        if !self.src2.is_none() && !matches!(self.src2, Operand::Label(_)) {
            v.push(&self.src2);
        }
        v
    }

    pub fn sources_mut(&mut self) -> SmallVec<[&mut Operand; 4]> {
        let mut v = SmallVec::new();
        match &mut self.ext {
            InstExt::Phi { phi_args, .. } => {
                for a in phi_args {
                    v.push(a);
                }
                return v;
            }
            InstExt::Branch { .. } => {
                v.push(&mut self.src1);
                return v;
            }
            InstExt::Switch { .. } => {
                v.push(&mut self.src1);
                return v;
            }
            _ => {}
        }
        if !self.src1.is_none() && !matches!(self.src1, Operand::Label(_)) {
            v.push(&mut self.src1);
        }
        if !self.src2.is_none() && !matches!(self.src2, Operand::Label(_)) {
            v.push(&mut self.src2);
        }
        v
    }

    /// Block ids this terminator transfers control to, in a stable order
    /// (case order preserved, default last for `switch`).
    pub fn targets(&self) -> SmallVec<[BlockId; 4]> {
        let mut v = SmallVec::new();
        match self.opcode {
            Opcode::Jump => {
                if let Operand::Label(b) = self.src1 {
                    v.push(b);
                }
            }
            Opcode::Branch => {
                if let Operand::Label(t) = self.src2 {
                    v.push(t);
                }
                if let InstExt::Branch { false_target } = &self.ext {
                    v.push(*false_target);
                }
            }
            Opcode::Switch => {
                if let InstExt::Switch { cases, default } = &self.ext {
                    for (_, t) in cases {
                        v.push(*t);
                    }
                    v.push(*default);
                }
            }
            _ => {}
        }
        v
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn branch_sources_excludes_target_labels() {
        let i = Inst::terminator_branch(Operand::Vreg(VregId(1), None), BlockId(1), BlockId(2), 0);
        let srcs = i.sources();
        assert_eq!(srcs.len(), 1);
        assert_eq!(*srcs[0], Operand::Vreg(VregId(1), None));
    }

    #[test]
    fn branch_targets_are_true_then_false() {
        let i = Inst::terminator_branch(Operand::ImmInt(1), BlockId(5), BlockId(6), 0);
        assert_eq!(i.targets().into_vec(), vec![BlockId(5), BlockId(6)]);
    }

    #[test]
    fn switch_targets_preserve_case_order_with_default_last() {
        let i = Inst::terminator_switch(
            Operand::Vreg(VregId(0), None),
            vec![(1, BlockId(1)), (2, BlockId(2))],
            BlockId(3),
            0,
        );
        assert_eq!(
            i.targets().into_vec(),
            vec![BlockId(1), BlockId(2), BlockId(3)]
        );
    }

    #[test]
    fn phi_sources_are_its_arguments() {
        let mut p = Inst::phi(VregId(0), 0, vec![BlockId(1), BlockId(2)], 0);
        if let InstExt::Phi { phi_args, .. } = &mut p.ext {
            phi_args[0] = Operand::ImmInt(10);
            phi_args[1] = Operand::ImmInt(20);
        }
        let srcs = p.sources();
        assert_eq!(srcs.len(), 2);
    }
}
