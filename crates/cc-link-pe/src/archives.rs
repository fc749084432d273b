//! Phase 3 — iterative archive (`.lib`) resolution: while some symbol
//! is both undefined and actually referenced, scan each archive's
//! symbol index for a matching name and load the member, which is
//! either a real COFF `.obj` (merged like any other input object) or a
//! short import object (recorded as a pending import, materialized
//! into the import tables by [`crate::imports::build`] once resolution
//! reaches a fixed point). Loop until a full pass loads nothing new.

use crate::shortimport;
use cc_common::CoreResult;
use cc_link::{Archive, LinkerState};
use cc_objwriter::coff;

pub struct NamedArchive<'a> {
    pub id: String,
    pub archive: Archive<'a>,
}

/// One import pulled from a `.lib`'s short import object, or
/// synthesized from [`crate::fallback`] when no archive provides it.
#[derive(Debug, Clone)]
pub struct PendingImport {
    pub func_name: String,
    pub dll_name: String,
    pub ordinal_hint: u16,
}

pub fn resolve(state: &mut LinkerState, archives: &[NamedArchive]) -> CoreResult<Vec<PendingImport>> {
    let mut pending = Vec::new();
    loop {
        let referenced = state.relocations.values().flatten().map(|r| r.symbol);
        let undefined = state.symbols.undefined_among(referenced);
        if undefined.is_empty() {
            break;
        }

        let mut loaded_any = false;
        for name in &undefined {
            for named in archives {
                for offset in named.archive.offsets_defining(name) {
                    if state.is_loaded(&named.id, offset) {
                        continue;
                    }
                    let Some(member) = named.archive.member_at(offset) else {
                        continue;
                    };
                    state.mark_loaded(&named.id, offset);

                    if shortimport::is_short_import(member.data) {
                        let imp = shortimport::parse(member.data)?;
                        log::debug!("resolving `{name}` to `{}:{}` via short import object `{}`", imp.dll_name, imp.func_name, named.id);
                        pending.push(PendingImport {
                            func_name: imp.func_name,
                            dll_name: imp.dll_name,
                            ordinal_hint: imp.ordinal_hint,
                        });
                    } else {
                        log::debug!("loading `{}` from `{}` for undefined symbol `{name}`", member.name, named.id);
                        let obj = coff::read(member.data)?;
                        crate::ingest::merge_parsed(state, obj);
                    }
                    loaded_any = true;
                }
            }
        }

        if !loaded_any {
            break;
        }
    }

    // Anything still undefined and referenced after every archive is
    // exhausted falls back to the built-in DLL map (spec.md §4.9 Phase
    // 4: "lets the linker function when `.lib` files are unavailable").
    let referenced = state.relocations.values().flatten().map(|r| r.symbol);
    let still_undefined = state.symbols.undefined_among(referenced);
    for name in still_undefined {
        if let Some(dll) = crate::fallback::lookup(&name) {
            let already_pending = pending.iter().any(|p| p.func_name == name);
            if !already_pending {
                log::debug!("resolving `{name}` via built-in fallback table -> `{dll}`");
                pending.push(PendingImport {
                    func_name: name,
                    dll_name: dll.to_string(),
                    ordinal_hint: 0,
                });
            }
        }
    }

    Ok(pending)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cc_link::{Binding, Relocation, SectionTag, Symbol, SymbolKind};
    use cc_objwriter::ObjectWriter;

    fn build_test_archive(members: &[(&str, &[u8])]) -> Vec<u8> {
        fn pad(s: &str, width: usize) -> Vec<u8> {
            let mut out = s.as_bytes().to_vec();
            out.resize(width, b' ');
            out
        }
        fn header(out: &mut Vec<u8>, name: &str, size: usize) {
            out.extend_from_slice(&pad(name, 16));
            out.extend_from_slice(&pad("0", 12));
            out.extend_from_slice(&pad("0", 6));
            out.extend_from_slice(&pad("0", 6));
            out.extend_from_slice(&pad("100644", 8));
            out.extend_from_slice(&pad(&size.to_string(), 10));
            out.extend_from_slice(b"`\n");
        }
        let mut body = Vec::new();
        let mut offsets = Vec::new();
        for (name, data) in members {
            offsets.push(body.len());
            header(&mut body, name, data.len());
            body.extend_from_slice(data);
            if data.len() % 2 == 1 {
                body.push(b'\n');
            }
        }
        let mut symtab = Vec::new();
        symtab.extend_from_slice(&(members.len() as u32).to_be_bytes());
        let patch_at = symtab.len();
        symtab.extend(std::iter::repeat(0u8).take(4 * members.len()));
        for (name, _) in members {
            symtab.extend_from_slice(name.as_bytes());
            symtab.push(0);
        }
        let symtab_member_total = 60 + symtab.len() + (symtab.len() % 2);
        let base = 8 + symtab_member_total;
        for (i, off) in offsets.iter().enumerate() {
            let abs = (base + off) as u32;
            symtab[patch_at + i * 4..patch_at + i * 4 + 4].copy_from_slice(&abs.to_be_bytes());
        }
        let mut out = Vec::new();
        out.extend_from_slice(b"!<arch>\n");
        header(&mut out, "/", symtab.len());
        out.extend_from_slice(&symtab);
        if symtab.len() % 2 == 1 {
            out.push(b'\n');
        }
        out.extend_from_slice(&body);
        out
    }

    fn object_defining(name: &str) -> Vec<u8> {
        let mut w = ObjectWriter::new();
        w.text = vec![0xc3];
        w.add_symbol(Symbol::new(name, 0, SectionTag::Text, Binding::Global, SymbolKind::Func));
        let mut out = cc_common::Buffer::new();
        coff::write(&w, &mut out);
        out.into_vec()
    }

    #[test]
    fn loads_a_coff_member_defining_a_referenced_symbol() {
        let mut state = LinkerState::new();
        let undef = state.symbols.merge_global(Symbol::undefined("helper", Binding::Global)) as u32;
        state.add_relocation(Relocation::new(0, SectionTag::Text, undef, 4, 0));

        let obj_bytes = object_defining("helper");
        let raw = build_test_archive(&[("helper.o", &obj_bytes)]);
        let archive = Archive::parse(&raw).unwrap();
        let named = [NamedArchive { id: "help.lib".into(), archive }];

        let pending = resolve(&mut state, &named).unwrap();
        assert!(pending.is_empty());
        let idx = state.symbols.find_global("helper").unwrap();
        assert!(state.symbols.get(idx).is_defined());
    }

    #[test]
    fn loads_a_short_import_member_as_a_pending_import() {
        let mut state = LinkerState::new();
        let undef = state.symbols.merge_global(Symbol::undefined("printf", Binding::Global)) as u32;
        state.add_relocation(Relocation::new(0, SectionTag::Text, undef, 4, 0));

        let import_bytes = shortimport::build("printf", "ucrtbase.dll", 7);
        let raw = build_test_archive(&[("printf.dll", &import_bytes)]);
        let archive = Archive::parse(&raw).unwrap();
        let named = [NamedArchive { id: "ucrt.lib".into(), archive }];

        let pending = resolve(&mut state, &named).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].func_name, "printf");
        assert_eq!(pending[0].dll_name, "ucrtbase.dll");
    }

    #[test]
    fn unresolved_symbol_with_no_archive_falls_back_to_builtin_table() {
        let mut state = LinkerState::new();
        let undef = state.symbols.merge_global(Symbol::undefined("ExitProcess", Binding::Global)) as u32;
        state.add_relocation(Relocation::new(0, SectionTag::Text, undef, 4, 0));

        let pending = resolve(&mut state, &[]).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].dll_name, "kernel32.dll");
    }
}
