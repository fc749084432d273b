//! Phase 6 (symbol finalization) and Phase 7 (relocation application).
//! Every symbol's in-section offset becomes a virtual address by
//! adding its section's final base from [`crate::layout::Layout`];
//! every recorded relocation then patches its section's bytes in
//! place per spec.md §4.9's Phase 7 table.

use crate::layout::Layout;
use cc_common::{Buffer, CoreError, CoreResult};
use cc_link::{LinkerState, SectionTag};
use cc_objwriter::elf;

fn section_vaddr(tag: SectionTag, layout: &Layout) -> Option<u64> {
    match tag {
        SectionTag::Text => Some(layout.text_vaddr),
        SectionTag::Data => Some(layout.data_vaddr),
        SectionTag::Rdata => Some(layout.rdata_vaddr),
        SectionTag::Bss => Some(layout.bss_vaddr),
        SectionTag::Undefined | SectionTag::Absolute => None,
    }
}

fn section_name(tag: SectionTag) -> &'static str {
    match tag {
        SectionTag::Text => ".text",
        SectionTag::Data => ".data",
        SectionTag::Rdata => ".rodata",
        SectionTag::Bss => ".bss",
        SectionTag::Undefined | SectionTag::Absolute => "",
    }
}

/// Phase 6: adds each symbol's section's final base to its in-section
/// offset. `Bss`/`Rdata`/`Data`/`Text` symbols are rebased; `Absolute`
/// and already-resolved-by-construction `Undefined` symbols (there
/// should be none left referenced, see [`crate::link`]) are untouched.
pub fn finalize_symbols(state: &mut LinkerState, layout: &Layout) {
    for sym in state.symbols.symbols.iter_mut() {
        if let Some(base) = section_vaddr(sym.section, layout) {
            sym.value += base;
        }
    }
}

/// Phase 7: applies every recorded relocation to the section bytes it
/// targets, now that every symbol carries a final virtual address.
pub fn apply(state: &mut LinkerState, layout: &Layout) -> CoreResult<()> {
    finalize_symbols(state, layout);

    let relocations = std::mem::take(&mut state.relocations);
    for (tag, relocs) in relocations {
        let Some(base_vaddr) = section_vaddr(tag, layout) else {
            continue;
        };
        // Resolve every relocation's symbol value before taking the
        // mutable section-buffer borrow below.
        let resolved: Vec<u64> = relocs.iter().map(|r| state.symbols.get(r.symbol as usize).value).collect();
        let buf = state.section_buffer_mut(tag);
        for (r, sym_value) in relocs.iter().zip(resolved) {
            let patch_va = base_vaddr + r.offset;
            apply_one(buf, r.offset as usize, r.reloc_type, r.addend, patch_va, sym_value, tag)?;
        }
    }
    Ok(())
}

fn apply_one(
    buf: &mut Buffer,
    offset: usize,
    reloc_type: u32,
    addend: i64,
    patch_va: u64,
    sym_value: u64,
    tag: SectionTag,
) -> CoreResult<()> {
    match reloc_type {
        elf::R_X86_64_64 => {
            buf.patch_u64(offset, sym_value.wrapping_add(addend as u64));
        }
        elf::R_X86_64_PC32 | elf::R_X86_64_PLT32 => {
            let v = (sym_value as i64).wrapping_add(addend).wrapping_sub(patch_va as i64);
            if v < i32::MIN as i64 || v > i32::MAX as i64 {
                return Err(CoreError::relocation_overflow(
                    offset as u64,
                    section_name(tag),
                    "PC32 displacement out of ±2^31 range",
                ));
            }
            buf.patch_u32(offset, v as u32);
        }
        elf::R_X86_64_32 => {
            let v = sym_value.wrapping_add(addend as u64);
            if v > u32::MAX as u64 {
                return Err(CoreError::relocation_overflow(offset as u64, section_name(tag), "value exceeds unsigned 32-bit range"));
            }
            buf.patch_u32(offset, v as u32);
        }
        elf::R_X86_64_32S => {
            let v = (sym_value as i64).wrapping_add(addend);
            if v < i32::MIN as i64 || v > i32::MAX as i64 {
                return Err(CoreError::relocation_overflow(offset as u64, section_name(tag), "value exceeds signed 32-bit range"));
            }
            buf.patch_u32(offset, v as u32);
        }
        other => return Err(CoreError::unsupported_relocation(other, section_name(tag))),
    }
    Ok(())
}
