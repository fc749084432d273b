//! IR operands. An algebraic sum type rather than a tagged union with a
//! payload pointer: the string-owning variants (`Var`, `FuncRef`, `StrLit`)
//! own their strings outright, so a function's instructions can outlive
//! whatever produced them without borrowing back into the AST.

use crate::types::IrType;
use std::fmt;

/// Identifies a virtual register within one function. Never compared
/// across functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VregId(pub u32);

impl fmt::Display for VregId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Identifies a basic block within one function; also its index into
/// `Function::blocks`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub u32);

impl BlockId {
    pub const ENTRY: BlockId = BlockId(0);

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bb{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    None,
    /// A virtual register, optionally tagged with its IR type.
    Vreg(VregId, Option<IrType>),
    /// A named source variable, used only transiently before the builder
    /// resolves it to its canonical vreg.
    Var(String),
    ImmInt(i64),
    ImmFloat(f64),
    /// A basic-block id used as a jump/branch/switch target operand.
    Label(BlockId),
    FuncRef(String),
    StrLit(String),
}

impl Operand {
    pub fn vreg(&self) -> Option<VregId> {
        match self {
            Operand::Vreg(v, _) => Some(*v),
            _ => None,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Operand::None)
    }

    pub fn as_int_imm(&self) -> Option<i64> {
        match self {
            Operand::ImmInt(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::None => write!(f, "-"),
            Operand::Vreg(v, _) => write!(f, "{v}"),
            Operand::Var(name) => write!(f, "%{name}"),
            Operand::ImmInt(v) => write!(f, "{v}"),
            Operand::ImmFloat(v) => write!(f, "{v}"),
            Operand::Label(b) => write!(f, "{b}"),
            Operand::FuncRef(name) => write!(f, "@{name}"),
            Operand::StrLit(s) => write!(f, "{s:?}"),
        }
    }
}
