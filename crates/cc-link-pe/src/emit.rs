//! Phase 8 — final PE32+ image emission: DOS header/stub, `PE\0\0`
//! signature, COFF file header, PE32+ optional header (with its
//! 16-entry data directory, import directory entry populated when the
//! image imports anything), section headers, then raw section bytes at
//! the file offsets [`crate::layout::compute`] assigned them.

use crate::layout::{Layout, COFF_HEADER_SIZE, DOS_HEADER_SIZE, OPTIONAL_HEADER_SIZE, PE_SIGNATURE_SIZE, SECTION_HEADER_SIZE};
use cc_common::Buffer;
use cc_link::LinkerState;
use cc_objwriter::coff::IMAGE_FILE_MACHINE_AMD64;

const OPTIONAL_HEADER_MAGIC_PE32_PLUS: u16 = 0x20b;
const SUBSYSTEM_WINDOWS_CUI: u16 = 3;
const NUM_DATA_DIRECTORIES: u32 = 16;
const DATA_DIR_IMPORT: usize = 1;

const IMAGE_FILE_EXECUTABLE_IMAGE: u16 = 0x0002;
const IMAGE_FILE_LARGE_ADDRESS_AWARE: u16 = 0x0020;

const IMAGE_SCN_CNT_CODE: u32 = 0x0000_0020;
const IMAGE_SCN_CNT_INITIALIZED_DATA: u32 = 0x0000_0040;
const IMAGE_SCN_CNT_UNINITIALIZED_DATA: u32 = 0x0000_0080;
const IMAGE_SCN_MEM_EXECUTE: u32 = 0x2000_0000;
const IMAGE_SCN_MEM_READ: u32 = 0x4000_0000;
const IMAGE_SCN_MEM_WRITE: u32 = 0x8000_0000u32;

fn section_name8(name: &str, out: &mut Buffer) {
    let bytes = name.as_bytes();
    let mut fixed = [0u8; 8];
    let n = bytes.len().min(8);
    fixed[..n].copy_from_slice(&bytes[..n]);
    out.bytes(&fixed);
}

#[allow(clippy::too_many_arguments)]
fn write_section_header(out: &mut Buffer, name: &str, virtual_size: u64, rva: u64, raw_size: u64, file_offset: u64, characteristics: u32) {
    section_name8(name, out);
    out.u32(virtual_size as u32);
    out.u32(rva as u32);
    out.u32(raw_size as u32);
    out.u32(file_offset as u32);
    out.u32(0); // PointerToRelocations: none, this linker emits a final image, not an object
    out.u32(0); // PointerToLinenumbers
    out.u16(0); // NumberOfRelocations
    out.u16(0); // NumberOfLinenumbers
    out.u32(characteristics);
}

/// `import_directory` is `(rva, size)` of the import directory table
/// built by [`crate::imports::build`], once its cross-references have
/// been patched via [`crate::imports::ImportSections::finalize`].
pub fn emit(state: &LinkerState, layout: &Layout, import_directory: Option<(u64, u64)>) -> Buffer {
    let mut file = Buffer::new();

    // DOS header: only `e_magic` and `e_lfanew` matter to a PE loader,
    // everything between is historically a DOS stub printing "This
    // program cannot be run in DOS mode." — omitted here since nothing
    // that loads this image runs it under real DOS.
    file.bytes(b"MZ");
    while (file.len() as u64) < DOS_HEADER_SIZE - 4 {
        file.u8(0);
    }
    file.u32(DOS_HEADER_SIZE as u32); // e_lfanew: PE signature immediately follows
    debug_assert_eq!(file.len() as u64, DOS_HEADER_SIZE);

    file.bytes(b"PE\0\0");
    debug_assert_eq!(file.len() as u64, DOS_HEADER_SIZE + PE_SIGNATURE_SIZE);

    // COFF file header.
    file.u16(IMAGE_FILE_MACHINE_AMD64);
    file.u16(layout.num_sections);
    file.u32(0); // TimeDateStamp: reproducible builds carry no timestamp
    file.u32(0); // PointerToSymbolTable: no COFF symbol table in an image
    file.u32(0); // NumberOfSymbols
    file.u16(OPTIONAL_HEADER_SIZE as u16);
    file.u16(IMAGE_FILE_EXECUTABLE_IMAGE | IMAGE_FILE_LARGE_ADDRESS_AWARE);
    debug_assert_eq!(file.len() as u64, DOS_HEADER_SIZE + PE_SIGNATURE_SIZE + COFF_HEADER_SIZE);

    // PE32+ optional header.
    let entry_rva = state.symbols.find_global("__pe_entry").map(|i| state.symbols.get(i).value).unwrap_or(0);
    let size_of_code = layout.text.map(|s| s.raw_size).unwrap_or(0);
    let size_of_initialized_data = layout.rdata.map(|s| s.raw_size).unwrap_or(0) + layout.data.map(|s| s.raw_size).unwrap_or(0);
    let size_of_uninitialized_data = layout.bss.map(|s| s.virtual_size).unwrap_or(0);

    file.u16(OPTIONAL_HEADER_MAGIC_PE32_PLUS);
    file.u8(0); // MajorLinkerVersion
    file.u8(0); // MinorLinkerVersion
    file.u32(size_of_code as u32);
    file.u32(size_of_initialized_data as u32);
    file.u32(size_of_uninitialized_data as u32);
    file.u32(entry_rva as u32);
    file.u32(layout.text_vaddr() as u32); // BaseOfCode
    file.u64(layout.image_base);
    file.u32(crate::layout::SECTION_ALIGNMENT as u32);
    file.u32(crate::layout::FILE_ALIGNMENT as u32);
    file.u16(6); // MajorOperatingSystemVersion: Windows Vista/Server 2008 baseline
    file.u16(0);
    file.u16(0); // MajorImageVersion
    file.u16(0);
    file.u16(6); // MajorSubsystemVersion
    file.u16(0);
    file.u32(0); // Win32VersionValue, reserved
    file.u32(layout.size_of_image as u32);
    file.u32(layout.size_of_headers as u32);
    file.u32(0); // CheckSum: unchecked outside kernel-mode drivers
    file.u16(SUBSYSTEM_WINDOWS_CUI);
    file.u16(0); // DllCharacteristics
    file.u64(0x10_0000); // SizeOfStackReserve: 1 MiB, the MSVC CRT default
    file.u64(0x1000); // SizeOfStackCommit
    file.u64(0x10_0000); // SizeOfHeapReserve
    file.u64(0x1000); // SizeOfHeapCommit
    file.u32(0); // LoaderFlags, reserved
    file.u32(NUM_DATA_DIRECTORIES);

    let mut directories = [(0u32, 0u32); NUM_DATA_DIRECTORIES as usize];
    if let Some((rva, size)) = import_directory {
        directories[DATA_DIR_IMPORT] = (rva as u32, size as u32);
    }
    for (rva, size) in directories {
        file.u32(rva);
        file.u32(size);
    }

    debug_assert_eq!(file.len() as u64, DOS_HEADER_SIZE + PE_SIGNATURE_SIZE + COFF_HEADER_SIZE + OPTIONAL_HEADER_SIZE);

    if let Some(s) = layout.text {
        write_section_header(&mut file, ".text", s.virtual_size, s.rva, s.raw_size, s.file_offset, IMAGE_SCN_CNT_CODE | IMAGE_SCN_MEM_EXECUTE | IMAGE_SCN_MEM_READ);
    }
    if let Some(s) = layout.rdata {
        write_section_header(&mut file, ".rdata", s.virtual_size, s.rva, s.raw_size, s.file_offset, IMAGE_SCN_CNT_INITIALIZED_DATA | IMAGE_SCN_MEM_READ);
    }
    if let Some(s) = layout.data {
        write_section_header(&mut file, ".data", s.virtual_size, s.rva, s.raw_size, s.file_offset, IMAGE_SCN_CNT_INITIALIZED_DATA | IMAGE_SCN_MEM_READ | IMAGE_SCN_MEM_WRITE);
    }
    if let Some(s) = layout.bss {
        write_section_header(&mut file, ".bss", s.virtual_size, s.rva, s.raw_size, s.file_offset, IMAGE_SCN_CNT_UNINITIALIZED_DATA | IMAGE_SCN_MEM_READ | IMAGE_SCN_MEM_WRITE);
    }

    debug_assert!(file.len() as u64 <= layout.size_of_headers);
    while (file.len() as u64) < layout.size_of_headers {
        file.u8(0);
    }

    if let Some(s) = layout.text {
        while (file.len() as u64) < s.file_offset {
            file.u8(0);
        }
        file.bytes(state.text.as_slice());
    }
    if let Some(s) = layout.rdata {
        while (file.len() as u64) < s.file_offset {
            file.u8(0);
        }
        file.bytes(state.rdata.as_slice());
    }
    if let Some(s) = layout.data {
        while (file.len() as u64) < s.file_offset {
            file.u8(0);
        }
        file.bytes(state.data.as_slice());
    }
    // `.bss` carries no file bytes: its SizeOfRawData/PointerToRawData
    // are already 0 from layout, nothing further to write.

    file
}
