//! Phase 8 — final executable emission: ELF64 header, program headers
//! in the order spec.md §4.9 names (`PT_INTERP`, `PT_LOAD` R+X,
//! `PT_LOAD` R+W, `PT_DYNAMIC`, trimmed to the first two when nothing
//! needed dynamic linking), then every section's raw bytes at the file
//! offsets [`crate::layout::compute`] assigned them. No section header
//! table is emitted — nothing downstream of this linker reads one back
//! (`.dynamic`/`.bss` are found via program headers alone), and leaving
//! it out keeps Phase 8 a single linear write.

use crate::dynamic::DynamicSections;
use crate::layout::{Layout, EHDR_SIZE, PHDR_SIZE};
use cc_common::Buffer;
use cc_link::LinkerState;
use cc_objwriter::elf::{EM_X86_64, ET_REL as _};

const ET_EXEC: u16 = 2;

const PT_LOAD: u32 = 1;
const PT_DYNAMIC: u32 = 2;
const PT_INTERP: u32 = 3;

const PF_X: u32 = 1;
const PF_W: u32 = 2;
const PF_R: u32 = 4;

#[allow(clippy::too_many_arguments)]
fn write_phdr(buf: &mut Buffer, p_type: u32, flags: u32, offset: u64, vaddr: u64, filesz: u64, memsz: u64, align: u64) {
    buf.u32(p_type);
    buf.u32(flags);
    buf.u64(offset);
    buf.u64(vaddr);
    buf.u64(vaddr); // p_paddr, unused on this target
    buf.u64(filesz);
    buf.u64(memsz);
    buf.u64(align);
}

pub fn emit(state: &LinkerState, layout: &Layout, dyn_sections: Option<&DynamicSections>) -> Buffer {
    let mut file = Buffer::new();

    file.bytes(&[0x7f, b'E', b'L', b'F', 2, 1, 1, 0]);
    file.bytes(&[0u8; 8]);
    file.u16(ET_EXEC);
    file.u16(EM_X86_64);
    file.u32(1); // e_version
    file.u64(layout.entry_address());
    file.u64(EHDR_SIZE); // e_phoff: program headers immediately follow the header
    file.u64(0); // e_shoff: no section header table in the emitted executable
    file.u32(0); // e_flags
    file.u16(EHDR_SIZE as u16);
    file.u16(PHDR_SIZE as u16);
    file.u16(layout.phnum);
    file.u16(0); // e_shentsize
    file.u16(0); // e_shnum
    file.u16(0); // e_shstrndx

    debug_assert_eq!(file.len() as u64, EHDR_SIZE);

    if layout.dynamic {
        write_phdr(&mut file, PT_INTERP, PF_R, layout.interp_vaddr - layout.base_address, layout.interp_vaddr, layout.interp_size, layout.interp_size, 1);
    }
    write_phdr(
        &mut file,
        PT_LOAD,
        PF_R | PF_X,
        layout.seg1_file_offset,
        layout.seg1_vaddr,
        layout.seg1_filesz,
        layout.seg1_filesz,
        0x1000,
    );
    write_phdr(
        &mut file,
        PT_LOAD,
        PF_R | PF_W,
        layout.seg2_file_offset,
        layout.seg2_vaddr,
        layout.seg2_filesz,
        layout.seg2_memsz,
        0x1000,
    );
    if layout.dynamic {
        write_phdr(
            &mut file,
            PT_DYNAMIC,
            PF_R | PF_W,
            layout.dynamic_vaddr - layout.base_address,
            layout.dynamic_vaddr,
            layout.dynamic_size,
            layout.dynamic_size,
            8,
        );
    }

    debug_assert_eq!(file.len() as u64, EHDR_SIZE + layout.phnum as u64 * PHDR_SIZE);

    if let Some(d) = dyn_sections {
        file.bytes(d.interp.as_slice());
        file.align(8);
        file.bytes(d.hash.as_slice());
        file.align(8);
        file.bytes(d.dynsym.as_slice());
        file.align(8);
        file.bytes(d.dynstr.as_slice());
        file.align(8);
        file.bytes(d.rela_plt.as_slice());
        file.align(8);
        file.bytes(d.dynamic.as_slice());
    }

    file.align(16);
    debug_assert_eq!(file.len() as u64, layout.text_vaddr - layout.base_address);
    file.bytes(state.text.as_slice());
    file.align(16);
    debug_assert_eq!(file.len() as u64, layout.rdata_vaddr - layout.base_address);
    file.bytes(state.rdata.as_slice());

    debug_assert_eq!(file.len() as u64, layout.seg1_filesz);
    while (file.len() as u64) < layout.seg2_file_offset {
        file.u8(0);
    }
    file.bytes(state.data.as_slice());

    file
}
