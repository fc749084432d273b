//! The fixed three-address opcode set.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    // const / copy / alloca
    Const,
    Copy,
    Alloca,

    // binary arithmetic
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    And,
    Or,
    Xor,
    Shl,
    Shr,

    // comparisons
    CmpEq,
    CmpNe,
    CmpLt,
    CmpLe,
    CmpGt,
    CmpGe,

    // logical short-circuit results; the builder lowers `&&`/`||` to CFG
    // (branch + phi) rather than constructing these directly, but they
    // remain part of the opcode partition for producers that don't need
    // the control-flow split (e.g. a peephole pass over known-pure operands).
    LogAnd,
    LogOr,

    // unary
    Neg,
    Not,
    BitNot,

    // memory
    Load,
    Store,
    AddrOf,
    Member,
    Cast,
    Index,
    IndexAddr,

    // call sequence
    Param,
    Call,

    // terminators
    Jump,
    Branch,
    Return,
    Switch,

    // special
    Nop,
    Phi,
}

impl Opcode {
    pub fn is_terminator(self) -> bool {
        matches!(
            self,
            Opcode::Jump | Opcode::Branch | Opcode::Return | Opcode::Switch
        )
    }

    pub fn is_phi(self) -> bool {
        matches!(self, Opcode::Phi)
    }

    /// True for opcodes whose result depends only on their operands, with
    /// no observable side effect — the set GVN/CSE and SCCP's rewrite
    /// phase are allowed to fold or delete.
    pub fn is_pure(self) -> bool {
        matches!(
            self,
            Opcode::Add
                | Opcode::Sub
                | Opcode::Mul
                | Opcode::Div
                | Opcode::Mod
                | Opcode::And
                | Opcode::Or
                | Opcode::Xor
                | Opcode::Shl
                | Opcode::Shr
                | Opcode::CmpEq
                | Opcode::CmpNe
                | Opcode::CmpLt
                | Opcode::CmpLe
                | Opcode::CmpGt
                | Opcode::CmpGe
                | Opcode::Neg
                | Opcode::Not
                | Opcode::BitNot
                | Opcode::Cast
        )
    }

    pub fn is_binary_arith(self) -> bool {
        matches!(
            self,
            Opcode::Add
                | Opcode::Sub
                | Opcode::Mul
                | Opcode::Div
                | Opcode::Mod
                | Opcode::And
                | Opcode::Or
                | Opcode::Xor
                | Opcode::Shl
                | Opcode::Shr
        )
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            Opcode::CmpEq
                | Opcode::CmpNe
                | Opcode::CmpLt
                | Opcode::CmpLe
                | Opcode::CmpGt
                | Opcode::CmpGe
        )
    }

    pub fn is_unary(self) -> bool {
        matches!(self, Opcode::Neg | Opcode::Not | Opcode::BitNot)
    }
}
