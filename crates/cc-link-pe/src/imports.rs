//! Phase 4, PE branch — materializes every [`PendingImport`] archive
//! resolution (or [`crate::fallback`]) produced into the actual PE
//! import machinery: grouped by DLL, an import-directory table, an
//! import-lookup table and import-address table per DLL, hint/name
//! records, and DLL-name strings, all placed in `.rdata`; one 6-byte
//! `jmp [rip+disp32]` thunk per regular import symbol, padded to 8
//! bytes with `int3`, appended to `.text`.
//!
//! Every cross-reference within this blob (directory → ILT/IAT/name
//! RVA) is recorded as a `(field offset, target offset)` pair relative
//! to the start of `.rdata` and patched once `.rdata`'s final RVA is
//! known ([`Self::finalize`]) — the same two-phase shape
//! `cc-link-elf::dynamic` uses for `.rela.plt`/`.dynamic`.

use crate::archives::PendingImport;
use cc_common::{Buffer, CoreResult};
use cc_link::{Binding, LinkerState, Relocation, SectionTag, Symbol, SymbolKind};
use cc_objwriter::coff::IMAGE_REL_AMD64_REL32;
use std::collections::BTreeMap;

const SECTION_ALIGN: u64 = 16;
const DIRECTORY_ENTRY_SIZE: u64 = 20;
const THUNK_SIZE: u64 = 8;

pub struct ImportSections {
    /// Offsets (within `.rdata`) of every `u32` RVA field still
    /// needing `.rdata`'s base added, paired with the `.rdata`-relative
    /// offset they should end up pointing at.
    pending_fields: Vec<(u64, u64)>,
    /// `.rdata`-relative offset of the import directory table.
    directory_off: u64,
    pub directory_size: u64,
}

impl ImportSections {
    /// Adds `rdata_vaddr` to every recorded cross-reference field and
    /// returns the import directory table's final RVA, for the
    /// optional header's data directory entry.
    pub fn finalize(&self, state: &mut LinkerState, rdata_vaddr: u64) -> u64 {
        for (field_off, target_off) in &self.pending_fields {
            state.rdata.patch_u32(*field_off as usize, (rdata_vaddr + target_off) as u32);
        }
        rdata_vaddr + self.directory_off
    }
}

/// Builds the import machinery for every pending import, returns
/// `None` if there's nothing to import (a freestanding executable with
/// no DLL dependencies — still valid on PE, just unusual).
pub fn build(state: &mut LinkerState, imports: Vec<PendingImport>) -> CoreResult<Option<ImportSections>> {
    if imports.is_empty() {
        return Ok(None);
    }

    let mut by_dll: BTreeMap<String, Vec<PendingImport>> = BTreeMap::new();
    for imp in imports {
        by_dll.entry(imp.dll_name.clone()).or_default().push(imp);
    }

    log::debug!("building PE import tables for {} DLL(s)", by_dll.len());

    let rdata_base = state.pad_section(SectionTag::Rdata, SECTION_ALIGN);
    let mut pending_fields = Vec::new();

    // Layout, in order: directory table (+ null terminator), then per
    // DLL an ILT and an IAT (each slot-count + 1 for its null
    // terminator), then hint/name records, then DLL name strings.
    let dll_names: Vec<&String> = by_dll.keys().collect();
    let directory_off = rdata_base;
    let directory_entries = dll_names.len() as u64 + 1;
    let mut cursor = directory_off + directory_entries * DIRECTORY_ENTRY_SIZE;

    struct DllLayout {
        ilt_off: u64,
        iat_off: u64,
        entries: Vec<PendingImport>,
    }
    let mut layouts = Vec::with_capacity(by_dll.len());
    for (_, entries) in &by_dll {
        let slot_count = entries.len() as u64 + 1;
        let ilt_off = cursor;
        cursor += slot_count * 8;
        let iat_off = cursor;
        cursor += slot_count * 8;
        layouts.push(DllLayout {
            ilt_off,
            iat_off,
            entries: entries.clone(),
        });
    }

    // Hint/name records, one per import, in the same DLL order.
    let mut hint_name_offsets: Vec<Vec<u64>> = Vec::with_capacity(layouts.len());
    let mut hint_name_bytes = Buffer::new();
    for layout in &layouts {
        let mut offs = Vec::with_capacity(layout.entries.len());
        for imp in &layout.entries {
            offs.push(cursor + hint_name_bytes.len() as u64);
            hint_name_bytes.u16(imp.ordinal_hint);
            hint_name_bytes.cstr(&imp.func_name);
            hint_name_bytes.align(2);
        }
        hint_name_offsets.push(offs);
    }
    let hint_name_region_off = cursor;
    cursor += hint_name_bytes.len() as u64;

    // DLL name strings.
    let mut dll_name_offsets = Vec::with_capacity(dll_names.len());
    let mut dll_name_bytes = Buffer::new();
    for name in &dll_names {
        dll_name_offsets.push(cursor + dll_name_bytes.len() as u64);
        dll_name_bytes.cstr(name);
    }
    let total_len = (cursor + dll_name_bytes.len() as u64) - rdata_base;

    // Now actually write the bytes in the order the offsets above
    // assumed, recording every cross-reference field as we go.
    let rdata = state.section_buffer_mut(SectionTag::Rdata);
    debug_assert_eq!(rdata.len() as u64, directory_off);

    // Directory table: one 20-byte descriptor per DLL, written with
    // placeholder zero RVAs, patched in the second pass below once
    // ILT/IAT/name offsets are all known (they already are, from the
    // layout pass above).
    for (i, layout) in layouts.iter().enumerate() {
        let entry_off = rdata.len() as u64;
        pending_fields.push((entry_off, layout.ilt_off)); // OriginalFirstThunk
        rdata.u32(0);
        rdata.u32(0); // TimeDateStamp
        rdata.u32(0); // ForwarderChain
        pending_fields.push((entry_off + 12, dll_name_offsets[i])); // Name
        rdata.u32(0);
        pending_fields.push((entry_off + 16, layout.iat_off)); // FirstThunk
        rdata.u32(0);
    }
    rdata.bytes(&[0u8; DIRECTORY_ENTRY_SIZE as usize]); // null terminator descriptor

    for (dll_idx, layout) in layouts.iter().enumerate() {
        for table_off in [layout.ilt_off, layout.iat_off] {
            debug_assert_eq!(rdata.len() as u64, table_off);
            for (i, _) in layout.entries.iter().enumerate() {
                let slot_off = rdata.len() as u64;
                pending_fields.push((slot_off, hint_name_offsets[dll_idx][i]));
                rdata.u64(0); // patched below: hint/name RVA, high bit clear (import by name)
            }
            rdata.u64(0); // null-terminated array
        }
    }

    debug_assert_eq!(rdata.len() as u64, hint_name_region_off);
    rdata.bytes(hint_name_bytes.as_slice());
    rdata.bytes(dll_name_bytes.as_slice());
    debug_assert_eq!(rdata.len() as u64 - rdata_base, total_len);

    // One thunk per import, in the same DLL order; the regular symbol
    // `foo` is defined at the thunk, `__imp_foo` directly at the IAT
    // slot (both still `.rdata`/`.text`-section-relative until Phase 6
    // rebasing).
    state.pad_section(SectionTag::Text, SECTION_ALIGN);
    for layout in &layouts {
        for (i, imp) in layout.entries.iter().enumerate() {
            let iat_slot_off = layout.iat_off + (i as u64) * 8;
            let iat_slot_sym = state.symbols.add_local(Symbol::new(
                format!("__iat_slot_{}", imp.func_name),
                iat_slot_off,
                SectionTag::Rdata,
                Binding::Local,
                SymbolKind::Object,
            )) as u32;

            let thunk_off = state.text.len() as u64;
            state.text.u8(0xff).u8(0x25).u32(0); // jmp [rip+disp32]
            while (state.text.len() as u64) - thunk_off < THUNK_SIZE {
                state.text.u8(0xcc);
            }
            state.add_relocation(Relocation::new(thunk_off + 2, SectionTag::Text, iat_slot_sym, IMAGE_REL_AMD64_REL32 as u32, 0));

            merge_defined(state, &imp.func_name, thunk_off, SectionTag::Text, SymbolKind::Func);
            merge_defined(state, &format!("__imp_{}", imp.func_name), iat_slot_off, SectionTag::Rdata, SymbolKind::Object);
        }
    }

    Ok(Some(ImportSections {
        pending_fields,
        directory_off,
        directory_size: directory_entries * DIRECTORY_ENTRY_SIZE,
    }))
}

/// Defines `name` at `value`/`section`, whether or not a prior
/// (necessarily undefined) reference to it already exists in the
/// symbol table.
fn merge_defined(state: &mut LinkerState, name: &str, value: u64, section: SectionTag, kind: SymbolKind) {
    state.symbols.merge_global(Symbol::new(name, value, section, Binding::Global, kind));
}
