//! Phase 5 — layout: assigns every section its final virtual address
//! and file offset. Two program headers when nothing needed dynamic
//! linking (a single R+X segment holding headers/.text/.rodata, a
//! single R+W segment holding .data/.bss, a page boundary between
//! them); four when [`crate::dynamic::build`] produced something
//! (`PT_INTERP` and `PT_DYNAMIC` added around the same two `PT_LOAD`s).
//!
//! The R+X segment carries everything read-only (headers, `.interp`,
//! the dynamic-link metadata sections, `.text`, `.rodata`) in one
//! contiguous range rather than splitting read-only data from
//! executable code into their own segment — this toolchain does not
//! model `.eh_frame`/RELRO-shaped concerns that would motivate the
//! extra segment (spec.md's own non-goals), and it keeps the "exactly
//! two program headers" testable property simple to satisfy.

use crate::dynamic::DynamicSections;
use cc_common::align_up;
use cc_link::LinkerState;

pub const DEFAULT_BASE_ADDRESS: u64 = 0x0040_0000;
const PAGE_ALIGN: u64 = 0x1000;
pub const EHDR_SIZE: u64 = 64;
pub const PHDR_SIZE: u64 = 56;

#[derive(Debug, Clone, Default)]
pub struct Layout {
    pub base_address: u64,
    pub phnum: u16,
    pub dynamic: bool,

    pub seg1_file_offset: u64,
    pub seg1_vaddr: u64,
    pub seg1_filesz: u64,

    pub seg2_file_offset: u64,
    pub seg2_vaddr: u64,
    pub seg2_filesz: u64,
    pub seg2_memsz: u64,

    pub interp_vaddr: u64,
    pub interp_size: u64,
    pub hash_vaddr: u64,
    pub dynsym_vaddr: u64,
    pub dynstr_vaddr: u64,
    pub rela_plt_vaddr: u64,
    pub dynamic_vaddr: u64,
    pub dynamic_size: u64,

    pub text_vaddr: u64,
    pub rdata_vaddr: u64,
    pub data_vaddr: u64,
    pub bss_vaddr: u64,
}

impl Layout {
    /// Address the ELF header's `e_entry` field should carry: `_start`
    /// (synthesized in Phase 2) always sits at offset 0 of `.text`.
    pub fn entry_address(&self) -> u64 {
        self.text_vaddr
    }
}

/// Advances `cursor` to `align`, returning both the padded cursor and
/// the `base_address`-relative virtual address it lands at.
fn place(cursor: &mut u64, align: u64, base_address: u64, len: u64) -> u64 {
    *cursor = align_up(*cursor, align);
    let vaddr = base_address + *cursor;
    *cursor += len;
    vaddr
}

pub fn compute(state: &LinkerState, dyn_sections: Option<&DynamicSections>, base_address: u64) -> Layout {
    let phnum: u16 = if dyn_sections.is_some() { 4 } else { 2 };
    let headers_size = EHDR_SIZE + phnum as u64 * PHDR_SIZE;

    let mut cursor = headers_size;
    let mut l = Layout {
        base_address,
        phnum,
        dynamic: dyn_sections.is_some(),
        ..Layout::default()
    };

    if let Some(d) = dyn_sections {
        l.interp_vaddr = place(&mut cursor, 1, base_address, d.interp.len() as u64);
        l.interp_size = d.interp.len() as u64;
        l.hash_vaddr = place(&mut cursor, 8, base_address, d.hash.len() as u64);
        l.dynsym_vaddr = place(&mut cursor, 8, base_address, d.dynsym.len() as u64);
        l.dynstr_vaddr = place(&mut cursor, 8, base_address, d.dynstr.len() as u64);
        l.rela_plt_vaddr = place(&mut cursor, 8, base_address, d.rela_plt.len() as u64);
        l.dynamic_vaddr = place(&mut cursor, 8, base_address, d.dynamic.len() as u64);
        l.dynamic_size = d.dynamic.len() as u64;
    }

    l.text_vaddr = place(&mut cursor, 16, base_address, state.text.len() as u64);
    l.rdata_vaddr = place(&mut cursor, 16, base_address, state.rdata.len() as u64);

    l.seg1_file_offset = 0;
    l.seg1_vaddr = base_address;
    l.seg1_filesz = cursor;

    // `base_address` is itself page-aligned, so rounding the raw byte
    // count up to the page and adding it to `base_address`/0 lands both
    // file offset and vaddr on the same residue mod `PAGE_ALIGN`, which
    // is what `PT_LOAD.p_vaddr ≡ p_offset (mod p_align)` requires.
    let seg2_cursor = align_up(l.seg1_filesz, PAGE_ALIGN);
    l.seg2_file_offset = seg2_cursor;
    l.seg2_vaddr = base_address + seg2_cursor;

    l.data_vaddr = l.seg2_vaddr;
    l.bss_vaddr = l.data_vaddr + state.data.len() as u64;
    l.seg2_filesz = state.data.len() as u64;
    l.seg2_memsz = l.seg2_filesz + state.bss_size;

    l
}
