//! Phase 1 — object ingestion: parse a relocatable, pad the linker's
//! merged section buffers to alignment, append its raw bytes, and merge
//! its symbols/relocations into the unified tables with offsets rebased
//! to the new section base.

use cc_common::CoreResult;
use cc_link::{Binding, LinkerState, SectionTag};
use cc_objwriter::{elf, ParsedObject};

const SECTION_ALIGN: u64 = 16;

/// Parses `bytes` as an ELF64 relocatable object and merges it into `state`.
pub fn ingest_object(state: &mut LinkerState, bytes: &[u8]) -> CoreResult<()> {
    let obj = elf::read(bytes)?;
    merge_parsed(state, obj);
    Ok(())
}

/// Merges an already-parsed object into `state`. Shared by direct
/// object ingestion and by archive member loading (Phase 3), which both
/// produce a [`ParsedObject`] before this step runs.
pub fn merge_parsed(state: &mut LinkerState, obj: ParsedObject) {
    let text_base = state.pad_section(SectionTag::Text, SECTION_ALIGN);
    state.section_buffer_mut(SectionTag::Text).bytes(&obj.text);
    let data_base = state.pad_section(SectionTag::Data, SECTION_ALIGN);
    state.section_buffer_mut(SectionTag::Data).bytes(&obj.data);
    let rdata_base = state.pad_section(SectionTag::Rdata, SECTION_ALIGN);
    state.section_buffer_mut(SectionTag::Rdata).bytes(&obj.rdata);
    let bss_base = state.reserve_bss(obj.bss_size, SECTION_ALIGN);

    let base_of = |tag: SectionTag| -> u64 {
        match tag {
            SectionTag::Text => text_base,
            SectionTag::Data => data_base,
            SectionTag::Rdata => rdata_base,
            SectionTag::Bss => bss_base,
            SectionTag::Undefined | SectionTag::Absolute => 0,
        }
    };

    let mut index_map = vec![0u32; obj.symbols.len()];
    for (i, mut sym) in obj.symbols.into_iter().enumerate() {
        sym.value += base_of(sym.section);
        let new_idx = match sym.binding {
            Binding::Local => state.symbols.add_local(sym) as u32,
            Binding::Weak | Binding::Global => state.symbols.merge_global(sym) as u32,
        };
        index_map[i] = new_idx;
    }

    for (tag, relocs) in obj.relocations {
        let base = base_of(tag);
        for r in relocs {
            let rebased = r.rebased(base).reindexed(index_map[r.symbol as usize]);
            state.add_relocation(rebased);
        }
    }
}
