//! Shared linker data model: sections, symbols, relocations, the
//! unified symbol table, `ar`/`.lib` archive parsing, and the merged
//! linker state both `cc-link-elf` and `cc-link-pe` build their
//! target-specific phases on top of.

pub mod archive;
pub mod relocation;
pub mod section;
pub mod state;
pub mod symbol;
pub mod symtab;

pub use archive::{Archive, ArchiveMember};
pub use relocation::Relocation;
pub use section::SectionTag;
pub use state::LinkerState;
pub use symbol::{Binding, Symbol, SymbolKind};
pub use symtab::SymbolTable;
