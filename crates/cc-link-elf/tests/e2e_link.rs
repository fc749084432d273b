//! End-to-end coverage of spec.md §8 scenario 5: a single relocatable
//! object defining `main` with no external references links into a
//! freestanding ELF64 executable with exactly two `PT_LOAD` segments
//! and no `.dynamic`, entered through the synthesized `_start` stub at
//! `base + 0xB0`. Unlike the colocated `#[cfg(test)]` unit tests in
//! `src/lib.rs`, this writes the result through [`write_executable`] to
//! a real `tempfile`-backed path and checks the file that lands on disk
//! rather than only the in-memory byte buffer.

use cc_link::{Binding, SectionTag, Symbol, SymbolKind};
use cc_link_elf::{link, write_executable, Input};
use cc_objwriter::{elf, ObjectWriter};

fn object_defining_main(return_value: u8) -> Vec<u8> {
    let mut w = ObjectWriter::new();
    // mov eax, return_value ; ret
    w.text = vec![0xb8, return_value, 0x00, 0x00, 0x00, 0xc3];
    w.add_symbol(Symbol::new("main", 0, SectionTag::Text, Binding::Global, SymbolKind::Func));
    let mut out = cc_common::Buffer::new();
    elf::write(&w, &mut out);
    out.into_vec()
}

#[test]
fn single_object_with_main_writes_an_executable_file_with_two_load_segments() {
    let obj = object_defining_main(42);
    let bytes = link(&[Input::Object(&obj)], "main").expect("link should succeed");

    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("a.out");
    write_executable(&path, &bytes).expect("write_executable should succeed");

    let on_disk = std::fs::read(&path).expect("linked file should exist on disk");
    assert_eq!(on_disk, bytes);
    assert_eq!(&on_disk[0..4], &[0x7f, b'E', b'L', b'F']);

    let e_phnum = u16::from_le_bytes(on_disk[56..58].try_into().unwrap());
    assert_eq!(e_phnum, 2, "no unresolved externals means no PT_DYNAMIC/PT_INTERP");

    let e_entry = u64::from_le_bytes(on_disk[24..32].try_into().unwrap());
    assert_eq!(e_entry, 0x0040_0000 + 0xB0, "entry is the _start stub placed after Ehdr+Phdrs");

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_ne!(mode & 0o111, 0, "write_executable must chmod +x on POSIX hosts");
    }
}
