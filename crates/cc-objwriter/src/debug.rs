//! CodeView debug-info construction for the `.debug$S` section COFF
//! objects carry when debug info is requested. `.debug$T` (type
//! records) is not built: this workspace's IR carries only the small,
//! fixed `IrType` set (see `cc-ir`), so there is no rich user-defined
//! type graph to encode — every local's `type_index` in `DebugLocal`
//! stays a placeholder `0` (`T_NOTYPE`) rather than indexing into a
//! `.debug$T` stream this crate never emits.
//!
//! Subsections are emitted in the fixed order the format requires:
//! string table, file checksums, symbols, lines. Each subsection is a
//! `{kind: u32, length: u32, data}` tuple padded to a 4-byte boundary;
//! the section itself opens with the CodeView signature `0x00000004`.

use crate::{DebugFunction, DebugInfo, LineEntry};
use cc_common::Buffer;

const CV_SIGNATURE: u32 = 4;

const DEBUG_S_SYMBOLS: u32 = 0xf1;
const DEBUG_S_LINES: u32 = 0xf2;
const DEBUG_S_STRINGTABLE: u32 = 0xf3;
const DEBUG_S_FILECHKSMS: u32 = 0xf4;

const S_OBJNAME: u16 = 0x1101;
const S_COMPILE3: u16 = 0x113c;
const S_GPROC32: u16 = 0x1110;
const S_FRAMEPROC: u16 = 0x1012;
const S_REGREL32: u16 = 0x1111;
const S_END: u16 = 0x0006;

/// An offset inside the `.debug$S` buffer that needs a relocation
/// against the `.text` section symbol once the symbol's final index is
/// known: `secrel` uses `IMAGE_REL_AMD64_SECREL`, `section` uses
/// `IMAGE_REL_AMD64_SECTION`.
pub struct PendingTextReloc {
    pub offset: u32,
    pub secrel: bool,
}

fn write_subsection(out: &mut Buffer, kind: u32, body: &[u8]) {
    out.u32(kind);
    out.u32(body.len() as u32);
    out.bytes(body);
    out.align(4);
}

/// Builds the `.debug$S` section contents for one translation unit.
/// Returns the bytes plus the list of offsets (relative to the start of
/// the section) that need a SECREL32+SECTION relocation pair against
/// the `.text` symbol — one pair per function's `S_GPROC32` `offset`
/// field.
pub fn build_debug_s(info: &DebugInfo) -> (Vec<u8>, Vec<PendingTextReloc>) {
    let mut out = Buffer::new();
    out.u32(CV_SIGNATURE);

    // --- string table: empty string at offset 0, then the filename.
    let mut strings = Buffer::new();
    strings.u8(0);
    let filename_offset = strings.len() as u32;
    strings.cstr(&info.source_file);
    write_subsection(&mut out, DEBUG_S_STRINGTABLE, strings.as_slice());

    // --- file checksums: one entry, no checksum bytes.
    let mut checksums = Buffer::new();
    let checksum_entry_offset = 0u32;
    checksums.u32(filename_offset);
    checksums.u8(0); // checksum length
    checksums.u8(0); // checksum kind: none
    checksums.align(4);
    write_subsection(&mut out, DEBUG_S_FILECHKSMS, checksums.as_slice());

    // --- symbols: S_OBJNAME, S_COMPILE3, then per function a
    // S_GPROC32/S_FRAMEPROC/S_REGREL32*/S_END group.
    let mut symbols = Buffer::new();
    let mut text_relocs = Vec::new();
    write_record(&mut symbols, S_OBJNAME, |b| {
        b.u32(0);
        b.cstr(&info.source_file);
    });
    write_record(&mut symbols, S_COMPILE3, |b| {
        b.u32(0); // flags
        b.u16(0xd0); // machine: CV_CFL_X64
        b.u16(0).u16(0).u16(0).u16(0); // frontend version
        b.u16(0).u16(0).u16(0).u16(0); // backend version
        b.cstr("fador c99 compiler");
    });

    for func in &info.functions {
        let base = symbols.len() as u32;
        // S_GPROC32's `offset` field lands 4 bytes into the record body
        // past the fixed pParent/pEnd/pNext/len/dbgStart/dbgEnd/typind
        // fields (7 u32s = 28 bytes), after the 4-byte record header.
        let gproc_reloc_base = base + 4 + 28;
        write_record(&mut symbols, S_GPROC32, |b| {
            b.u32(0); // pParent
            b.u32(0); // pEnd
            b.u32(0); // pNext
            b.u32(func.end.saturating_sub(func.start)); // proc length
            b.u32(0); // debug start
            b.u32(0); // debug end
            b.u32(0); // type index
            b.u32(func.start); // offset, SECREL32 relocation target
            b.u16(0); // segment, SECTION relocation target
            b.u8(0); // flags
            b.cstr(&func.name);
        });
        text_relocs.push(PendingTextReloc {
            offset: gproc_reloc_base,
            secrel: true,
        });
        text_relocs.push(PendingTextReloc {
            offset: gproc_reloc_base + 4,
            secrel: false,
        });

        write_record(&mut symbols, S_FRAMEPROC, |b| {
            b.u32(0).u32(0).u32(0).u32(0).u32(0).u32(0);
        });

        for local in &func.locals {
            write_record(&mut symbols, S_REGREL32, |b| {
                b.i32(local.frame_offset);
                b.u32(local.type_index);
                b.u16(if local.is_parameter { 0x14 } else { 0x14 }); // CV_AMD64_RBP, uniform for this ABI-unaware emission
                b.cstr(&local.name);
            });
        }

        write_record(&mut symbols, S_END, |_| {});
    }
    write_subsection(&mut out, DEBUG_S_SYMBOLS, symbols.as_slice());

    // --- lines: one block per function, addresses relative to the
    // function's own S_GPROC32 offset/segment pair.
    for func in &info.functions {
        let func_lines: Vec<&LineEntry> = info
            .lines
            .iter()
            .filter(|l| l.address >= func.start && l.address < func.end)
            .collect();
        if func_lines.is_empty() {
            continue;
        }
        let mut body = Buffer::new();
        let offset_reloc_at = body.len() as u32;
        body.u32(func.start); // SECREL32 against .text
        body.u16(0); // SECTION against .text
        body.u16(0); // flags
        body.u32(func.end.saturating_sub(func.start));
        body.u32(checksum_entry_offset);
        body.u32(func_lines.len() as u32);
        body.u32((func_lines.len() * 8) as u32); // block size
        for l in &func_lines {
            body.u32(l.address - func.start);
            body.u32((l.line & 0x00ff_ffff) | 0x8000_0000); // statement flag set
        }
        let block_base = out.len() as u32 + 8; // +8: this subsection's own kind/length header
        text_relocs.push(PendingTextReloc {
            offset: block_base + offset_reloc_at,
            secrel: true,
        });
        text_relocs.push(PendingTextReloc {
            offset: block_base + offset_reloc_at + 4,
            secrel: false,
        });
        write_subsection(&mut out, DEBUG_S_LINES, body.as_slice());
    }

    (out.into_vec(), text_relocs)
}

fn write_record(out: &mut Buffer, kind: u16, body_fn: impl FnOnce(&mut Buffer)) {
    let mut body = Buffer::new();
    body.u16(kind);
    body_fn(&mut body);
    out.u16(body.len() as u16);
    out.bytes(body.as_slice());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DebugLocal;

    #[test]
    fn signature_opens_the_section() {
        let info = DebugInfo {
            source_file: "main.c".into(),
            functions: vec![],
            lines: vec![],
        };
        let (bytes, _) = build_debug_s(&info);
        assert_eq!(&bytes[0..4], &CV_SIGNATURE.to_le_bytes());
    }

    #[test]
    fn one_function_yields_two_text_relocations_for_its_proc_record() {
        let info = DebugInfo {
            source_file: "main.c".into(),
            functions: vec![DebugFunction {
                name: "main".into(),
                start: 0,
                end: 16,
                locals: vec![DebugLocal {
                    name: "x".into(),
                    type_index: 0,
                    frame_offset: -8,
                    is_parameter: false,
                }],
            }],
            lines: vec![],
        };
        let (_, relocs) = build_debug_s(&info);
        let proc_relocs: Vec<_> = relocs.iter().filter(|r| r.secrel).collect();
        assert!(!proc_relocs.is_empty());
        assert_eq!(relocs.iter().filter(|r| r.secrel).count(), relocs.iter().filter(|r| !r.secrel).count());
    }
}
