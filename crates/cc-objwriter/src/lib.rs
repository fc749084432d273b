//! Emits relocatable COFF (`.obj`) or ELF64 (`.o`) object files: a
//! shared front end (`ObjectWriter`, built on `cc_link`'s section/
//! symbol/relocation model) collects text/data/rdata bytes, symbols and
//! relocations exactly as a code generator would hand them over one
//! function at a time, and optional per-function debug metadata; the
//! two backend modules (`coff`, `elf`) turn that into bit-exact bytes.
//! `coff`/`elf` also expose readers, used by the two linkers to ingest
//! object files during Phase 1 and exercised here by this crate's own
//! write-then-read round-trip tests (spec's "round-trip and idempotence"
//! testable property).

pub mod coff;
pub mod debug;
pub mod elf;

use cc_link::{Relocation, SectionTag, Symbol, SymbolTable};
use std::collections::HashMap;

/// One local variable in a function's debug record: name, its type
/// encoding (left as a small integer — the real type-encoding table
/// lives with the code generator, out of scope here), a frame-relative
/// offset, and whether it's a parameter.
#[derive(Debug, Clone)]
pub struct DebugLocal {
    pub name: String,
    pub type_index: u32,
    pub frame_offset: i32,
    pub is_parameter: bool,
}

#[derive(Debug, Clone)]
pub struct DebugFunction {
    pub name: String,
    pub start: u32,
    pub end: u32,
    pub locals: Vec<DebugLocal>,
}

/// Per-address line mapping, one entry per statement boundary.
#[derive(Debug, Clone, Copy)]
pub struct LineEntry {
    pub address: u32,
    pub line: u32,
}

#[derive(Debug, Clone, Default)]
pub struct DebugInfo {
    pub source_file: String,
    pub functions: Vec<DebugFunction>,
    pub lines: Vec<LineEntry>,
}

/// Collects the bytes, symbols and relocations a code generator
/// produces for one translation unit, ready to hand to [`coff::write`]
/// or [`elf::write`].
#[derive(Debug, Default)]
pub struct ObjectWriter {
    pub text: Vec<u8>,
    pub data: Vec<u8>,
    pub rdata: Vec<u8>,
    pub bss_size: u64,

    pub symbols: SymbolTable,
    pub relocations: HashMap<SectionTag, Vec<Relocation>>,

    /// `/DEFAULTLIB:` tokens this object's `.drectve` section should
    /// advertise (COFF only; ignored by the ELF writer).
    pub default_libs: Vec<String>,

    pub debug_info: Option<DebugInfo>,
}

impl ObjectWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or updates a symbol, deduplicating by name: a later
    /// definition of a previously undefined symbol updates the existing
    /// entry in place rather than appending a duplicate.
    pub fn add_symbol(&mut self, sym: Symbol) -> u32 {
        use cc_link::Binding;
        let idx = match sym.binding {
            Binding::Local => self.symbols.add_local(sym),
            Binding::Weak | Binding::Global => self.symbols.merge_global(sym),
        };
        idx as u32
    }

    pub fn add_relocation(&mut self, reloc: Relocation) {
        self.relocations.entry(reloc.section).or_default().push(reloc);
    }

    pub fn section_mut(&mut self, tag: SectionTag) -> &mut Vec<u8> {
        match tag {
            SectionTag::Text => &mut self.text,
            SectionTag::Data => &mut self.data,
            SectionTag::Rdata => &mut self.rdata,
            other => unreachable!("section {other:?} has no byte buffer"),
        }
    }

    pub fn set_debug_info(&mut self, info: DebugInfo) {
        self.debug_info = Some(info);
    }
}

/// An object file as read back by [`coff::read`]/[`elf::read`]: the raw
/// section bytes and a symbol/relocation set renumbered to be
/// self-contained (indices are local to this one object, same as they
/// were when written).
#[derive(Debug, Default)]
pub struct ParsedObject {
    pub text: Vec<u8>,
    pub data: Vec<u8>,
    pub rdata: Vec<u8>,
    pub bss_size: u64,
    pub symbols: Vec<Symbol>,
    pub relocations: HashMap<SectionTag, Vec<Relocation>>,
    /// COFF only: `/DEFAULTLIB:` tokens found in `.drectve`.
    pub default_libs: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use cc_link::{Binding, SymbolKind};

    #[test]
    fn add_symbol_updates_undefined_entry_in_place() {
        let mut w = ObjectWriter::new();
        let i1 = w.add_symbol(Symbol::undefined("main", Binding::Global));
        let i2 = w.add_symbol(Symbol::new("main", 0, SectionTag::Text, Binding::Global, SymbolKind::Func));
        assert_eq!(i1, i2);
        assert!(w.symbols.get(i2 as usize).is_defined());
    }
}
