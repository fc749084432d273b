//! Phase 3 — iterative archive resolution: while some symbol is both
//! undefined and actually referenced by a relocation, pull in every
//! archive member that defines one, until a full pass over every
//! undefined name loads nothing new.

use crate::ingest;
use cc_common::CoreResult;
use cc_link::{Archive, LinkerState};
use cc_objwriter::elf;

/// One loaded archive, keyed by an identity string (its path, or any
/// caller-chosen unique name) used to dedupe members across passes.
pub struct NamedArchive<'a> {
    pub id: String,
    pub archive: Archive<'a>,
}

pub fn resolve(state: &mut LinkerState, archives: &[NamedArchive]) -> CoreResult<()> {
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
                    log::debug!("loading `{}` from `{}` for undefined symbol `{name}`", member.name, named.id);
                    let obj = elf::read(member.data)?;
                    ingest::merge_parsed(state, obj);
                    loaded_any = true;
                }
            }
        }

        if !loaded_any {
            break;
        }
    }
    Ok(())
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
        w.text.extend_from_slice(&[0xc3]);
        w.add_symbol(Symbol::new(name, 0, SectionTag::Text, Binding::Global, SymbolKind::Func));
        let mut out = cc_common::Buffer::new();
        elf::write(&w, &mut out);
        out.into_vec()
    }

    #[test]
    fn loads_a_member_defining_a_referenced_undefined_symbol() {
        let mut state = LinkerState::new();
        let undef = state.symbols.merge_global(Symbol::undefined("helper", Binding::Global)) as u32;
        state.add_relocation(Relocation::new(0, SectionTag::Text, undef, elf::R_X86_64_PC32, 0));

        let obj_bytes = object_defining("helper");
        let raw = build_test_archive(&[("helper.o", &obj_bytes)]);
        let archive = Archive::parse(&raw).unwrap();
        let named = [NamedArchive { id: "libhelper.a".into(), archive }];

        resolve(&mut state, &named).unwrap();

        let idx = state.symbols.find_global("helper").unwrap();
        assert!(state.symbols.get(idx).is_defined());
    }

    #[test]
    fn unreferenced_undefined_symbols_are_left_alone() {
        let mut state = LinkerState::new();
        state.symbols.merge_global(Symbol::undefined("unused", Binding::Global));
        resolve(&mut state, &[]).unwrap();
        let idx = state.symbols.find_global("unused").unwrap();
        assert!(!state.symbols.get(idx).is_defined());
    }
}
