//! Shared linker state: the merged section buffers, the unified symbol
//! table, per-section relocation lists, and the bookkeeping both the
//! ELF and PE linkers need before they diverge into target-specific
//! phases (entry-stub synthesis, archive resolution is shared in
//! shape though not in object format, dynamic/import-table branches,
//! layout, relocation application, file emission).

use crate::relocation::Relocation;
use crate::section::SectionTag;
use crate::symtab::SymbolTable;
use cc_common::{align_up, Buffer};
use hashbrown::HashSet;
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct LinkerState {
    pub text: Buffer,
    pub data: Buffer,
    pub rdata: Buffer,
    pub bss_size: u64,

    pub symbols: SymbolTable,
    pub relocations: HashMap<SectionTag, Vec<Relocation>>,

    pub lib_search_paths: Vec<String>,
    pub lib_names: Vec<String>,

    /// `(archive identity, member header offset)` pairs already loaded,
    /// so a second undefined reference to a symbol in an already-loaded
    /// member doesn't load it twice.
    loaded_members: HashSet<(String, u64)>,
}

impl LinkerState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn section_buffer_mut(&mut self, tag: SectionTag) -> &mut Buffer {
        match tag {
            SectionTag::Text => &mut self.text,
            SectionTag::Data => &mut self.data,
            SectionTag::Rdata => &mut self.rdata,
            other => unreachable!("section {other:?} has no byte buffer"),
        }
    }

    pub fn section_buffer(&self, tag: SectionTag) -> &Buffer {
        match tag {
            SectionTag::Text => &self.text,
            SectionTag::Data => &self.data,
            SectionTag::Rdata => &self.rdata,
            other => unreachable!("section {other:?} has no byte buffer"),
        }
    }

    pub fn add_relocation(&mut self, reloc: Relocation) {
        self.relocations.entry(reloc.section).or_default().push(reloc);
    }

    /// Pads `section`'s buffer so the next append lands at `align`,
    /// returning that base offset.
    pub fn pad_section(&mut self, tag: SectionTag, align: u64) -> u64 {
        let buf = self.section_buffer_mut(tag);
        let target = align_up(buf.len() as u64, align.max(1));
        while (buf.len() as u64) < target {
            buf.u8(0);
        }
        buf.len() as u64
    }

    /// Reserves `size` bytes of BSS at `align`, returning the base
    /// offset the reservation starts at.
    pub fn reserve_bss(&mut self, size: u64, align: u64) -> u64 {
        let base = align_up(self.bss_size, align.max(1));
        self.bss_size = base + size;
        base
    }

    pub fn mark_loaded(&mut self, archive_id: &str, member_offset: u64) -> bool {
        self.loaded_members.insert((archive_id.to_string(), member_offset))
    }

    pub fn is_loaded(&self, archive_id: &str, member_offset: u64) -> bool {
        self.loaded_members.contains(&(archive_id.to_string(), member_offset))
    }
}
