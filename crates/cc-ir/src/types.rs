//! IR-level type handles. These are deliberately coarser than the typed
//! AST's [`cc_ast::Type`](../cc_ast/enum.Type.html) in width/shape — the
//! builder maps resolved AST types down to one of these when tagging a
//! destination operand.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IrType {
    I8,
    I32,
    I64,
    F64,
    Ptr,
}

impl IrType {
    /// Size in bytes, used by `alloca`/`index`/`member` lowering and by
    /// the register allocator's spill-slot sizing.
    pub fn size_of(self) -> u32 {
        match self {
            IrType::I8 => 1,
            IrType::I32 => 4,
            IrType::I64 | IrType::F64 | IrType::Ptr => 8,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, IrType::F64)
    }
}
