//! PE32+ static linker. Merges relocatable COFF `.obj` objects and
//! `.lib` archives (real COFF members and Microsoft "short import
//! object" members alike) into a single Windows executable image:
//! ingestion (§Phase 1), `__pe_entry` stub synthesis (§Phase 2),
//! archive resolution (§Phase 3), import-table synthesis for whatever
//! remains an external DLL reference (§Phase 4), layout (§Phase 5),
//! symbol finalization and relocation application (§Phases 6-7), and
//! PE32+ image emission (§Phase 8). [`link`] drives all eight phases in
//! order; the individual phase modules are public so tests can exercise
//! each independently, mirroring `cc-link-elf`'s shape.

pub mod archives;
pub mod emit;
pub mod entry;
pub mod fallback;
pub mod imports;
pub mod ingest;
pub mod layout;
pub mod relocation;
pub mod shortimport;

use archives::NamedArchive;
use cc_common::{CoreError, CoreResult};
use cc_link::{Archive, LinkerState};
use layout::DEFAULT_IMAGE_BASE;

pub enum Input<'a> {
    Object(&'a [u8]),
    Archive { id: String, bytes: &'a [u8] },
}

pub fn link(inputs: &[Input], entry: &str) -> CoreResult<Vec<u8>> {
    let mut state = LinkerState::new();
    let mut archives: Vec<NamedArchive> = Vec::new();
    for input in inputs {
        match input {
            Input::Object(bytes) => {
                let libs = ingest::ingest_object(&mut state, bytes)?;
                state.lib_names.extend(libs);
            }
            Input::Archive { id, bytes } => {
                let archive = Archive::parse(bytes)?;
                archives.push(NamedArchive { id: id.clone(), archive });
            }
        }
    }

    entry::synthesize(&mut state, entry, DEFAULT_IMAGE_BASE)?;
    let pending = archives::resolve(&mut state, &archives)?;
    let import_sections = imports::build(&mut state, pending)?;

    let referenced = state.relocations.values().flatten().map(|r| r.symbol);
    let still_undefined = state.symbols.undefined_among(referenced);
    if let Some(name) = still_undefined.into_iter().next() {
        return Err(CoreError::undefined_symbol(name));
    }

    let layout = layout::compute(&state, DEFAULT_IMAGE_BASE);
    let import_directory = import_sections.map(|s| {
        let rva = s.finalize(&mut state, layout.rdata_vaddr());
        (rva, s.directory_size)
    });

    relocation::apply(&mut state, &layout)?;
    let file = emit::emit(&state, &layout, import_directory);
    Ok(file.into_vec())
}

pub fn write_executable(path: &std::path::Path, bytes: &[u8]) -> CoreResult<()> {
    std::fs::write(path, bytes)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cc_link::{Binding, SectionTag, Symbol, SymbolKind};
    use cc_objwriter::{coff, ObjectWriter};
    use pretty_assertions::assert_eq;

    fn object_with_main_returning(code: u8) -> Vec<u8> {
        let mut w = ObjectWriter::new();
        // mov eax, code ; ret
        w.text = vec![0xb8, code, 0x00, 0x00, 0x00, 0xc3];
        w.add_symbol(Symbol::new("main", 0, SectionTag::Text, Binding::Global, SymbolKind::Func));
        let mut out = cc_common::Buffer::new();
        coff::write(&w, &mut out);
        out.into_vec()
    }

    #[test]
    fn links_a_single_object_with_main_into_a_pe32_plus_image() {
        let obj = object_with_main_returning(7);
        let bytes = link(&[Input::Object(&obj)], "main").unwrap();

        assert_eq!(&bytes[0..2], b"MZ");
        let lfanew = u32::from_le_bytes(bytes[60..64].try_into().unwrap()) as usize;
        assert_eq!(&bytes[lfanew..lfanew + 4], b"PE\0\0");
        let machine = u16::from_le_bytes(bytes[lfanew + 4..lfanew + 6].try_into().unwrap());
        assert_eq!(machine, cc_objwriter::coff::IMAGE_FILE_MACHINE_AMD64);
    }

    #[test]
    fn exit_process_resolves_through_the_builtin_fallback_table_with_no_libs_supplied() {
        let obj = object_with_main_returning(0);
        // Would fail with UndefinedSymbol if ExitProcess weren't resolved
        // by `crate::fallback` during archive resolution.
        assert!(link(&[Input::Object(&obj)], "main").is_ok());
    }

    #[test]
    fn truly_undefined_reference_is_rejected() {
        let mut w = ObjectWriter::new();
        w.text = vec![0xe8, 0, 0, 0, 0, 0xc3]; // call an_undefined_function; ret
        w.add_symbol(Symbol::new("main", 0, SectionTag::Text, Binding::Global, SymbolKind::Func));
        w.add_symbol(Symbol::undefined("an_undefined_function", Binding::Global));
        w.add_relocation(cc_link::Relocation::new(1, SectionTag::Text, 1, cc_objwriter::coff::IMAGE_REL_AMD64_REL32 as u32, 0));
        let mut out = cc_common::Buffer::new();
        coff::write(&w, &mut out);
        let bytes = out.into_vec();

        assert!(link(&[Input::Object(&bytes)], "main").is_err());
    }
}
