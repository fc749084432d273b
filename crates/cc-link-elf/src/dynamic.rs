//! Phase 4, ELF branch — the dynamic-link path taken when, after
//! archive resolution, some externally referenced symbol is still
//! undefined: every unresolved symbol becomes a `.dynsym`/`.dynstr`
//! entry, gets a PLT stub appended to `.text` and a GOT slot appended
//! to `.data`, and `.rela.plt`/`.hash`/`.dynamic` are built to describe
//! all of it to the runtime loader.

use cc_common::{Buffer, CoreResult};
use cc_link::{Binding, LinkerState, Relocation, SectionTag, Symbol, SymbolKind};
use cc_objwriter::elf;

const STB_GLOBAL: u8 = 1;
const STT_FUNC: u8 = 2;
const SHN_UNDEF: u16 = 0;

const R_X86_64_JUMP_SLOT: u64 = 7;

const DT_NULL: i64 = 0;
const DT_NEEDED: i64 = 1;
const DT_PLTRELSZ: i64 = 2;
const DT_PLTGOT: i64 = 3;
const DT_HASH: i64 = 4;
const DT_STRTAB: i64 = 5;
const DT_SYMTAB: i64 = 6;
/// The value `DT_PLTREL` takes when the PLT's relocations are `Rela`
/// (carry an explicit addend) rather than `Rel`.
const DT_RELA: u64 = 7;
const DT_STRSZ: i64 = 10;
const DT_SYMENT: i64 = 11;
const DT_PLTREL: i64 = 20;
const DT_JMPREL: i64 = 23;

/// Everything built during Phase 4 that isn't one of `LinkerState`'s
/// four section buffers: laid out and placed into program headers by
/// [`crate::layout`], patched with final addresses by [`Self::finalize`].
pub struct DynamicSections {
    pub interp: Buffer,
    pub hash: Buffer,
    pub dynsym: Buffer,
    pub dynstr: Buffer,
    pub rela_plt: Buffer,
    pub dynamic: Buffer,
    /// Section-relative `.data` offset of each resolved symbol's GOT
    /// slot, in `.rela.plt` order; used by [`Self::finalize`] to patch
    /// each entry's `r_offset` once `.data`'s final base is known.
    got_slot_offsets: Vec<u64>,
    /// Byte offset of each `.rela.plt` entry's `r_offset` field.
    rela_entry_at: Vec<usize>,
}

impl DynamicSections {
    /// Patches every `.rela.plt` entry's `r_offset` with its GOT
    /// slot's final virtual address, and assembles `.dynamic`.
    pub fn finalize(&mut self, hash_va: u64, dynsym_va: u64, dynstr_va: u64, rela_plt_va: u64, data_va: u64) {
        for (entry_off, got_off) in self.rela_entry_at.iter().zip(&self.got_slot_offsets) {
            self.rela_plt.patch_u64(*entry_off, data_va + got_off);
        }

        let mut dyn_buf = Buffer::new();
        let mut entry = |tag: i64, val: u64| {
            dyn_buf.i64(tag);
            dyn_buf.u64(val);
        };
        entry(DT_NEEDED, 0); // dynstr offset 0 is empty; no `.lib`-supplied SONAME in scope
        entry(DT_HASH, hash_va);
        entry(DT_STRTAB, dynstr_va);
        entry(DT_SYMTAB, dynsym_va);
        entry(DT_STRSZ, self.dynstr.len() as u64);
        entry(DT_SYMENT, 24);
        entry(DT_PLTGOT, data_va);
        entry(DT_PLTRELSZ, self.rela_plt.len() as u64);
        entry(DT_PLTREL, DT_RELA);
        entry(DT_JMPREL, rela_plt_va);
        entry(DT_NULL, 0);
        self.dynamic = dyn_buf;
    }
}

fn elf_hash(name: &[u8]) -> u32 {
    let mut h: u32 = 0;
    for &b in name {
        h = (h << 4).wrapping_add(b as u32);
        let g = h & 0xf000_0000;
        if g != 0 {
            h ^= g >> 24;
        }
        h &= !g;
    }
    h
}

fn write_dynsym(buf: &mut Buffer, name_off: u32, info: u8) {
    buf.u32(name_off);
    buf.u8(info);
    buf.u8(0); // st_other
    buf.u16(SHN_UNDEF);
    buf.u64(0); // st_value, PLT-resolved symbols don't need one here
    buf.u64(0); // st_size
}

/// Builds the dynamic-link sections if, after archive resolution, any
/// relocation still targets an undefined symbol. Returns `None` when
/// everything resolved statically — the "no `.dynamic`" testable
/// property.
pub fn build(state: &mut LinkerState) -> CoreResult<Option<DynamicSections>> {
    let referenced = state.relocations.values().flatten().map(|r| r.symbol);
    let undefined_names = state.symbols.undefined_among(referenced);
    if undefined_names.is_empty() {
        return Ok(None);
    }

    log::debug!("{} symbol(s) remain undefined, building dynamic-link sections", undefined_names.len());

    let mut dynstr = Buffer::new();
    dynstr.u8(0);
    let mut name_offsets = Vec::with_capacity(undefined_names.len());
    for name in &undefined_names {
        name_offsets.push(dynstr.len() as u32);
        dynstr.cstr(name);
    }

    let mut dynsym = Buffer::new();
    write_dynsym(&mut dynsym, 0, 0); // null entry at index 0
    for &off in &name_offsets {
        write_dynsym(&mut dynsym, off, (STB_GLOBAL << 4) | STT_FUNC);
    }

    let nsyms = undefined_names.len() + 1;
    let nbucket = undefined_names.len().max(1) as u32;
    let mut bucket = vec![0u32; nbucket as usize];
    let mut chain = vec![0u32; nsyms];
    for (i, name) in undefined_names.iter().enumerate() {
        let sym_index = (i + 1) as u32;
        let b = (elf_hash(name.as_bytes()) % nbucket) as usize;
        chain[sym_index as usize] = bucket[b];
        bucket[b] = sym_index;
    }
    let mut hash = Buffer::new();
    hash.u32(nbucket);
    hash.u32(nsyms as u32);
    for b in &bucket {
        hash.u32(*b);
    }
    for c in &chain {
        hash.u32(*c);
    }

    let got_base = state.pad_section(SectionTag::Data, 8);
    for _ in &undefined_names {
        state.section_buffer_mut(SectionTag::Data).u64(0);
    }
    let mut got_slot_offsets = Vec::with_capacity(undefined_names.len());
    let mut got_slot_syms = Vec::with_capacity(undefined_names.len());
    for i in 0..undefined_names.len() {
        let off = got_base + (i as u64) * 8;
        got_slot_offsets.push(off);
        let idx = state.symbols.add_local(Symbol::new(
            format!("__got_slot_{i}"),
            off,
            SectionTag::Data,
            Binding::Local,
            SymbolKind::Object,
        ));
        got_slot_syms.push(idx as u32);
    }

    state.pad_section(SectionTag::Text, 16);
    for (i, name) in undefined_names.iter().enumerate() {
        let stub_off = state.text.len() as u64;
        state.text.u8(0xff).u8(0x25).u32(0); // jmp [rip+disp32]
        while (state.text.len() as u64) - stub_off < 16 {
            state.text.u8(0xcc);
        }
        state.add_relocation(Relocation::new(
            stub_off + 2,
            SectionTag::Text,
            got_slot_syms[i],
            elf::R_X86_64_PC32,
            -4,
        ));

        let sym_idx = state
            .symbols
            .find_global(name)
            .expect("undefined_among only reports names already in the symbol table");
        let sym = state.symbols.get_mut(sym_idx);
        sym.value = stub_off;
        sym.section = SectionTag::Text;
        sym.kind = SymbolKind::Func;
    }

    let mut rela_plt = Buffer::new();
    let mut rela_entry_at = Vec::with_capacity(undefined_names.len());
    for i in 0..undefined_names.len() {
        let entry_off = rela_plt.len();
        rela_entry_at.push(entry_off);
        rela_plt.u64(0); // r_offset, patched in `finalize`
        let sym_index = (i + 1) as u64;
        rela_plt.u64((sym_index << 32) | R_X86_64_JUMP_SLOT);
        rela_plt.i64(0); // r_addend
    }

    let mut interp = Buffer::new();
    interp.cstr("/lib64/ld-linux-x86-64.so.2");

    Ok(Some(DynamicSections {
        interp,
        hash,
        dynsym,
        dynstr,
        rela_plt,
        dynamic: Buffer::new(),
        got_slot_offsets,
        rela_entry_at,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn no_unresolved_symbols_builds_nothing() {
        let mut state = LinkerState::new();
        assert!(build(&mut state).unwrap().is_none());
    }

    #[test]
    fn unresolved_symbol_gets_a_plt_stub_and_got_slot() {
        let mut state = LinkerState::new();
        let undef = state.symbols.merge_global(Symbol::undefined("printf", Binding::Global)) as u32;
        state.add_relocation(Relocation::new(0, SectionTag::Text, undef, elf::R_X86_64_PLT32, -4));

        let dyn_sections = build(&mut state).unwrap().unwrap();

        assert_eq!(dyn_sections.got_slot_offsets.len(), 1);
        let resolved = state.symbols.get(undef as usize);
        assert!(resolved.is_defined());
        assert_eq!(resolved.section, SectionTag::Text);
        assert!(state.data.len() >= 8);
    }

    #[test]
    fn hash_table_chain_covers_every_symbol() {
        let mut state = LinkerState::new();
        for name in ["printf", "malloc", "free"] {
            let idx = state.symbols.merge_global(Symbol::undefined(name, Binding::Global)) as u32;
            state.add_relocation(Relocation::new(0, SectionTag::Text, idx, elf::R_X86_64_PLT32, -4));
        }
        let dyn_sections = build(&mut state).unwrap().unwrap();
        assert_eq!(dyn_sections.got_slot_offsets.len(), 3);
    }
}
