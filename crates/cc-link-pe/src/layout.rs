//! Phase 5 — layout: assigns every section its RVA (section-aligned,
//! 4 KiB) and file offset (file-aligned, 512 B), per spec.md §4.9's PE
//! alignment rule. Unlike the ELF linker's two/four program headers,
//! PE carries one section header per populated section plus a fixed
//! header region (DOS stub, PE signature, COFF file header, PE32+
//! optional header with its 16-entry data directory).

use cc_common::align_up;
use cc_link::LinkerState;

pub const DEFAULT_IMAGE_BASE: u64 = 0x0040_0000;
pub const SECTION_ALIGNMENT: u64 = 0x1000;
pub const FILE_ALIGNMENT: u64 = 0x200;

pub const DOS_HEADER_SIZE: u64 = 64;
pub const PE_SIGNATURE_SIZE: u64 = 4;
pub const COFF_HEADER_SIZE: u64 = 20;
pub const OPTIONAL_HEADER_SIZE: u64 = 112 + 16 * 8;
pub const SECTION_HEADER_SIZE: u64 = 40;

#[derive(Debug, Clone, Copy)]
pub struct SectionLayout {
    pub file_offset: u64,
    pub raw_size: u64,
    pub rva: u64,
    pub virtual_size: u64,
}

#[derive(Debug, Clone, Default)]
pub struct Layout {
    pub image_base: u64,
    pub size_of_headers: u64,
    pub size_of_image: u64,

    pub text: Option<SectionLayout>,
    pub rdata: Option<SectionLayout>,
    pub data: Option<SectionLayout>,
    pub bss: Option<SectionLayout>,

    pub num_sections: u16,
}

impl Layout {
    pub fn text_vaddr(&self) -> u64 {
        self.text.map(|s| s.rva).unwrap_or(0)
    }
    pub fn rdata_vaddr(&self) -> u64 {
        self.rdata.map(|s| s.rva).unwrap_or(0)
    }
    pub fn data_vaddr(&self) -> u64 {
        self.data.map(|s| s.rva).unwrap_or(0)
    }
    pub fn bss_vaddr(&self) -> u64 {
        self.bss.map(|s| s.rva).unwrap_or(0)
    }
}

pub fn compute(state: &LinkerState, image_base: u64) -> Layout {
    let mut num_sections: u16 = 0;
    if !state.text.is_empty() {
        num_sections += 1;
    }
    if !state.rdata.is_empty() {
        num_sections += 1;
    }
    if !state.data.is_empty() {
        num_sections += 1;
    }
    if state.bss_size > 0 {
        num_sections += 1;
    }

    let headers_raw = DOS_HEADER_SIZE + PE_SIGNATURE_SIZE + COFF_HEADER_SIZE + OPTIONAL_HEADER_SIZE + num_sections as u64 * SECTION_HEADER_SIZE;
    let size_of_headers = align_up(headers_raw, FILE_ALIGNMENT);

    let mut file_cursor = size_of_headers;
    let mut rva_cursor = align_up(size_of_headers, SECTION_ALIGNMENT);

    let mut place = |len: u64| -> SectionLayout {
        let file_offset = align_up(file_cursor, FILE_ALIGNMENT);
        let raw_size = align_up(len, FILE_ALIGNMENT);
        let rva = align_up(rva_cursor, SECTION_ALIGNMENT);
        let virtual_size = len.max(1);
        file_cursor = file_offset + raw_size;
        rva_cursor = rva + align_up(virtual_size, SECTION_ALIGNMENT);
        SectionLayout {
            file_offset,
            raw_size,
            rva,
            virtual_size,
        }
    };

    let text = (!state.text.is_empty()).then(|| place(state.text.len() as u64));
    let rdata = (!state.rdata.is_empty()).then(|| place(state.rdata.len() as u64));
    let data = (!state.data.is_empty()).then(|| place(state.data.len() as u64));
    let bss = (state.bss_size > 0).then(|| {
        // BSS reserves virtual space but carries no file bytes: its
        // raw_size is 0 and it does not advance `file_cursor`.
        let rva = align_up(rva_cursor, SECTION_ALIGNMENT);
        let virtual_size = state.bss_size;
        rva_cursor = rva + align_up(virtual_size, SECTION_ALIGNMENT);
        SectionLayout {
            file_offset: file_cursor,
            raw_size: 0,
            rva,
            virtual_size,
        }
    });

    let size_of_image = align_up(rva_cursor, SECTION_ALIGNMENT);

    Layout {
        image_base,
        size_of_headers,
        size_of_image,
        text,
        rdata,
        data,
        bss,
        num_sections,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn sections_are_rva_aligned_to_4k_and_file_aligned_to_512() {
        let mut state = LinkerState::new();
        state.text.bytes(&[0x90; 20]);
        state.data.bytes(&[1, 2, 3]);
        let layout = compute(&state, DEFAULT_IMAGE_BASE);
        assert_eq!(layout.text_vaddr() % SECTION_ALIGNMENT, 0);
        assert_eq!(layout.data.unwrap().file_offset % FILE_ALIGNMENT, 0);
    }

    #[test]
    fn headers_size_is_file_aligned() {
        let state = LinkerState::new();
        let layout = compute(&state, DEFAULT_IMAGE_BASE);
        assert_eq!(layout.size_of_headers % FILE_ALIGNMENT, 0);
    }

    #[test]
    fn bss_has_no_raw_file_size() {
        let mut state = LinkerState::new();
        state.bss_size = 64;
        let layout = compute(&state, DEFAULT_IMAGE_BASE);
        assert_eq!(layout.bss.unwrap().raw_size, 0);
        assert!(layout.bss.unwrap().virtual_size >= 64);
    }
}
