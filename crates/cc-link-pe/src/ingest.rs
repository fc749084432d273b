//! Phase 1 — object ingestion for COFF `.obj` inputs: parse, pad the
//! linker's merged section buffers to alignment, append raw bytes,
//! merge symbols/relocations into the unified tables, and collect
//! `/DEFAULTLIB:` tokens the object's `.drectve` section carried
//! (`cc_objwriter::coff::read` already extracts those into
//! [`cc_objwriter::ParsedObject::default_libs`]).

use cc_common::CoreResult;
use cc_link::{Binding, LinkerState, SectionTag};
use cc_objwriter::{coff, ParsedObject};

const SECTION_ALIGN: u64 = 16;

/// Default-static-CRT library names MSVC's own `.drectve` directives
/// commonly carry; filtered out so this linker's own built-in import
/// fallback table (`cc-link-pe::fallback`) is what resolves CRT
/// symbols instead of a real static-CRT archive this toolchain doesn't
/// ship.
const FILTERED_DEFAULT_LIBS: &[&str] = &["LIBCMT", "LIBCMTD", "MSVCRT", "MSVCRTD", "OLDNAMES"];

pub fn ingest_object(state: &mut LinkerState, bytes: &[u8]) -> CoreResult<Vec<String>> {
    let obj = coff::read(bytes)?;
    Ok(merge_parsed(state, obj))
}

/// Merges an already-parsed COFF object into `state`, returning the
/// `/DEFAULTLIB:` tokens it carried (post-filtering) for the caller to
/// fold into the linker's library-search list.
pub fn merge_parsed(state: &mut LinkerState, obj: ParsedObject) -> Vec<String> {
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

    obj.default_libs
        .into_iter()
        .filter(|lib| {
            let stem = lib.trim_end_matches(".lib").to_ascii_uppercase();
            !FILTERED_DEFAULT_LIBS.contains(&stem.as_str())
        })
        .collect()
}
