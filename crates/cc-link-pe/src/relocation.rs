//! Phase 6 (symbol finalization) and Phase 7 (relocation application).
//! Every symbol's section-relative offset becomes an RVA by adding its
//! section's final base from [`crate::layout::Layout`]; every recorded
//! relocation then patches its section's bytes in place, per spec.md
//! §4.9's PE relocation table (`ADDR64`, `REL32`, `ADDR32NB`).
//!
//! COFF relocations carry no explicit addend field the way ELF's Rela
//! does — [`crate::ingest`] always records `addend: 0` for anything
//! read back out of a real object, and [`crate::entry`]/[`crate::imports`]
//! do the same for synthesized ones, leaving the disp32/imm64 field
//! itself at zero. `REL32`'s "relative to the instruction following the
//! field" `+4` is therefore baked into the formula here rather than
//! supplied as an addend.

use crate::layout::Layout;
use cc_common::{Buffer, CoreError, CoreResult};
use cc_link::{LinkerState, SectionTag};
use cc_objwriter::coff::{IMAGE_REL_AMD64_ADDR32NB, IMAGE_REL_AMD64_ADDR64, IMAGE_REL_AMD64_REL32};

fn section_rva(tag: SectionTag, layout: &Layout) -> Option<u64> {
    match tag {
        SectionTag::Text => Some(layout.text_vaddr()),
        SectionTag::Data => Some(layout.data_vaddr()),
        SectionTag::Rdata => Some(layout.rdata_vaddr()),
        SectionTag::Bss => Some(layout.bss_vaddr()),
        SectionTag::Undefined | SectionTag::Absolute => None,
    }
}

fn section_name(tag: SectionTag) -> &'static str {
    match tag {
        SectionTag::Text => ".text",
        SectionTag::Data => ".data",
        SectionTag::Rdata => ".rdata",
        SectionTag::Bss => ".bss",
        SectionTag::Undefined | SectionTag::Absolute => "",
    }
}

/// Phase 6: adds each symbol's section's final RVA to its section-relative
/// offset. `__ImageBase` and any other `Absolute` symbol are untouched —
/// their value already carries the meaning they're meant to have.
pub fn finalize_symbols(state: &mut LinkerState, layout: &Layout) {
    for sym in state.symbols.symbols.iter_mut() {
        if let Some(base) = section_rva(sym.section, layout) {
            sym.value += base;
        }
    }
}

/// Phase 7: applies every recorded relocation now that every symbol
/// carries a final RVA.
pub fn apply(state: &mut LinkerState, layout: &Layout) -> CoreResult<()> {
    finalize_symbols(state, layout);

    let relocations = std::mem::take(&mut state.relocations);
    for (tag, relocs) in relocations {
        let Some(base_rva) = section_rva(tag, layout) else {
            continue;
        };
        let resolved: Vec<u64> = relocs.iter().map(|r| state.symbols.get(r.symbol as usize).value).collect();
        let buf = state.section_buffer_mut(tag);
        for (r, sym_value) in relocs.iter().zip(resolved) {
            let patch_rva = base_rva + r.offset;
            apply_one(buf, r.offset as usize, r.reloc_type, sym_value, patch_rva, layout.image_base, tag)?;
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn apply_one(buf: &mut Buffer, offset: usize, reloc_type: u32, sym_rva: u64, patch_rva: u64, image_base: u64, tag: SectionTag) -> CoreResult<()> {
    match reloc_type {
        t if t == IMAGE_REL_AMD64_ADDR64 as u32 => {
            // An absolute 64-bit pointer: this linker always resolves
            // against a fixed, non-relocatable image base, so the final
            // value is simply `image_base + RVA`.
            buf.patch_u64(offset, image_base + sym_rva);
        }
        t if t == IMAGE_REL_AMD64_REL32 as u32 => {
            let v = (sym_rva as i64) - (patch_rva as i64 + 4);
            if v < i32::MIN as i64 || v > i32::MAX as i64 {
                return Err(CoreError::relocation_overflow(offset as u64, section_name(tag), "REL32 displacement out of ±2^31 range"));
            }
            buf.patch_u32(offset, v as u32);
        }
        t if t == IMAGE_REL_AMD64_ADDR32NB as u32 => {
            // RVA relative to the image base, not a file offset: exactly
            // the RVA already computed during layout, no base add needed.
            if sym_rva > u32::MAX as u64 {
                return Err(CoreError::relocation_overflow(offset as u64, section_name(tag), "RVA exceeds unsigned 32-bit range"));
            }
            buf.patch_u32(offset, sym_rva as u32);
        }
        other => return Err(CoreError::unsupported_relocation(other, section_name(tag))),
    }
    Ok(())
}
