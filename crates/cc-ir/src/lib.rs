//! The IR data model: operands, opcodes, instructions, blocks, functions
//! and programs. This crate owns the types every analysis, optimization
//! pass, register allocator and the object writer build on; it does not
//! itself build IR from an AST (see `cc-build`) or analyze it (see
//! `cc-analysis`/`cc-ssa`/`cc-opt`).

pub mod block;
pub mod function;
pub mod inst;
pub mod opcode;
pub mod operand;
pub mod program;
pub mod types;
pub mod verify;

pub use block::Block;
pub use function::{Allocation, Function, VarInfo};
pub use inst::{Inst, InstExt};
pub use opcode::Opcode;
pub use operand::{BlockId, Operand, VregId};
pub use program::{Global, Program};
pub use types::IrType;
