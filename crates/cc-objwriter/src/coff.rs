//! COFF relocatable object emission and parsing (PE/COFF object format,
//! AMD64). Layout: file header, section headers, then each section's
//! raw data (`.text`/`.data`/`.rdata`/`.drectve`/`.debug$S`), relocations
//! inline after each section's data, then the symbol table and string
//! table last — the order a link.exe-produced `.obj` uses.

use crate::debug::build_debug_s;
use crate::{DebugInfo, ObjectWriter, ParsedObject};
use bitflags::bitflags;
use cc_common::{Buffer, CoreError, CoreResult};
use cc_link::{Binding, Relocation, SectionTag, Symbol, SymbolKind};
use std::collections::HashMap;

pub const IMAGE_FILE_MACHINE_AMD64: u16 = 0x8664;

bitflags! {
    /// COFF section-header `Characteristics` field (PE/COFF spec §4.1).
    struct SectionCharacteristics: u32 {
        const CNT_CODE               = 0x0000_0020;
        const CNT_INITIALIZED_DATA   = 0x0000_0040;
        const CNT_UNINITIALIZED_DATA = 0x0000_0080;
        const LNK_INFO               = 0x0000_0200;
        const LNK_REMOVE             = 0x0000_0800;
        const ALIGN_1BYTES           = 0x0010_0000;
        const MEM_DISCARDABLE        = 0x0200_0000;
        const MEM_EXECUTE            = 0x2000_0000;
        const MEM_READ               = 0x4000_0000;
        const MEM_WRITE              = 0x8000_0000;
    }
}

pub const IMAGE_REL_AMD64_ADDR64: u16 = 0x0001;
pub const IMAGE_REL_AMD64_ADDR32NB: u16 = 0x0003;
pub const IMAGE_REL_AMD64_REL32: u16 = 0x0004;
pub const IMAGE_REL_AMD64_SECTION: u16 = 0x000a;
pub const IMAGE_REL_AMD64_SECREL: u16 = 0x000b;

const IMAGE_SYM_CLASS_EXTERNAL: u8 = 2;
const IMAGE_SYM_CLASS_STATIC: u8 = 3;
const IMAGE_SYM_CLASS_WEAK_EXTERNAL: u8 = 105;

const IMAGE_SYM_UNDEFINED: i16 = 0;

struct SectionPlan {
    name: &'static str,
    tag: Option<SectionTag>,
    characteristics: SectionCharacteristics,
    data: Vec<u8>,
    size_override: Option<u32>,
    /// Relocations that target this section, already in COFF's own
    /// (offset, symtab-index, type) encoding.
    relocs: Vec<(u32, u32, u16)>,
}

/// Writes `w` as a COFF relocatable object (`.obj`) to `out`. `default_libs`
/// become a single `.drectve` section of space-separated `/DEFAULTLIB:`
/// tokens; `debug_info`, if set, becomes a `.debug$S` section whose
/// `S_GPROC32`/line-table offsets carry relocations against `.text`.
pub fn write(w: &ObjectWriter, out: &mut Buffer) {
    log::debug!("writing COFF object ({} symbols)", w.symbols.len());

    // Final symbol-table layout decided up front, since relocations and
    // the `.debug$S` builder both need final symbol indices: locals
    // first (no COFF requirement here, but mirrors the ELF writer),
    // then globals/weaks, each a single-aux-free entry.
    let mut locals: Vec<&Symbol> = Vec::new();
    let mut globals: Vec<&Symbol> = Vec::new();
    for sym in &w.symbols.symbols {
        match sym.binding {
            Binding::Local => locals.push(sym),
            Binding::Weak | Binding::Global => globals.push(sym),
        }
    }
    let mut orig_to_final: HashMap<*const Symbol, u32> = HashMap::new();
    for (i, sym) in locals.iter().chain(globals.iter()).enumerate() {
        orig_to_final.insert(*sym as *const Symbol, i as u32);
    }
    let final_index_of = |r: &Relocation, all: &[Symbol]| -> u32 {
        all.get(r.symbol as usize)
            .and_then(|s| orig_to_final.get(&(s as *const Symbol)))
            .copied()
            .unwrap_or(0)
    };

    let mut sections = Vec::new();
    if !w.text.is_empty() {
        let relocs = w
            .relocations
            .get(&SectionTag::Text)
            .map(|rs| rs.iter().map(|r| (r.offset as u32, final_index_of(r, &w.symbols.symbols), coff_reloc_type(r.reloc_type))).collect())
            .unwrap_or_default();
        sections.push(SectionPlan {
            name: ".text",
            tag: Some(SectionTag::Text),
            characteristics: SectionCharacteristics::CNT_CODE | SectionCharacteristics::MEM_EXECUTE | SectionCharacteristics::MEM_READ,
            data: w.text.clone(),
            size_override: None,
            relocs,
        });
    }
    if !w.data.is_empty() {
        let relocs = w
            .relocations
            .get(&SectionTag::Data)
            .map(|rs| rs.iter().map(|r| (r.offset as u32, final_index_of(r, &w.symbols.symbols), coff_reloc_type(r.reloc_type))).collect())
            .unwrap_or_default();
        sections.push(SectionPlan {
            name: ".data",
            tag: Some(SectionTag::Data),
            characteristics: SectionCharacteristics::CNT_INITIALIZED_DATA | SectionCharacteristics::MEM_READ | SectionCharacteristics::MEM_WRITE,
            data: w.data.clone(),
            size_override: None,
            relocs,
        });
    }
    if !w.rdata.is_empty() {
        let relocs = w
            .relocations
            .get(&SectionTag::Rdata)
            .map(|rs| rs.iter().map(|r| (r.offset as u32, final_index_of(r, &w.symbols.symbols), coff_reloc_type(r.reloc_type))).collect())
            .unwrap_or_default();
        sections.push(SectionPlan {
            name: ".rdata",
            tag: Some(SectionTag::Rdata),
            characteristics: SectionCharacteristics::CNT_INITIALIZED_DATA | SectionCharacteristics::MEM_READ,
            data: w.rdata.clone(),
            size_override: None,
            relocs,
        });
    }
    if w.bss_size > 0 {
        sections.push(SectionPlan {
            name: ".bss",
            tag: Some(SectionTag::Bss),
            characteristics: SectionCharacteristics::CNT_UNINITIALIZED_DATA | SectionCharacteristics::MEM_READ | SectionCharacteristics::MEM_WRITE,
            data: Vec::new(),
            size_override: Some(w.bss_size as u32),
            relocs: Vec::new(),
        });
    }
    if !w.default_libs.is_empty() {
        let tokens: Vec<String> = w.default_libs.iter().map(|l| format!("/DEFAULTLIB:{l}")).collect();
        sections.push(SectionPlan {
            name: ".drectve",
            tag: None,
            characteristics: SectionCharacteristics::LNK_INFO | SectionCharacteristics::LNK_REMOVE | SectionCharacteristics::ALIGN_1BYTES,
            data: tokens.join(" ").into_bytes(),
            size_override: None,
            relocs: Vec::new(),
        });
    }

    let section_index_of: HashMap<SectionTag, u16> = sections
        .iter()
        .enumerate()
        .filter_map(|(i, s)| s.tag.map(|t| (t, i as u16 + 1))) // COFF section numbers are 1-based
        .collect();

    if let Some(info) = &w.debug_info {
        let (bytes, pending) = build_debug_s(info);
        let text_symbol = find_section_symbol(w, SectionTag::Text, &orig_to_final);
        let relocs = pending
            .into_iter()
            .map(|p| {
                let ty = if p.secrel { IMAGE_REL_AMD64_SECREL } else { IMAGE_REL_AMD64_SECTION };
                (p.offset, text_symbol, ty)
            })
            .collect();
        sections.push(SectionPlan {
            name: ".debug$S",
            tag: None,
            characteristics: SectionCharacteristics::CNT_INITIALIZED_DATA | SectionCharacteristics::MEM_READ | SectionCharacteristics::MEM_DISCARDABLE,
            data: bytes,
            size_override: None,
            relocs,
        });
    }

    // String table: names longer than 8 bytes go here, referenced from
    // the fixed 8-byte name field by a decimal offset in bytes 4..8.
    let mut strtab = Buffer::new();
    strtab.u32(0); // size field, patched below

    let mut symtab = Buffer::new();
    let mut num_symbols = 0u32;
    for sym in locals.iter().chain(globals.iter()) {
        let section_number = coff_section_number(sym.section, &section_index_of);
        write_sym_name(&mut symtab, &sym.name, &mut |n| {
            let off = strtab.len() as u32;
            strtab.cstr(n);
            off
        });
        symtab.i32(sym.value as i32);
        symtab.u16(section_number as u16);
        symtab.u16(if matches!(sym.kind, SymbolKind::Func) { 0x20 } else { 0 });
        symtab.u8(coff_storage_class(sym.binding, sym.section));
        symtab.u8(0); // no auxiliary symbols
        num_symbols += 1;
    }

    let strtab_bytes = strtab.into_vec();
    let mut strtab_final = Buffer::new();
    strtab_final.u32(strtab_bytes.len() as u32);
    strtab_final.bytes(&strtab_bytes[4..]);

    let mut file = Buffer::new();
    file.u16(IMAGE_FILE_MACHINE_AMD64);
    file.u16(sections.len() as u16);
    file.u32(0); // timestamp
    let symtab_ptr_patch_at = file.len();
    file.u32(0); // pointer to symbol table, patched below
    file.u32(num_symbols);
    file.u16(0); // size of optional header
    file.u16(0); // characteristics

    let header_end = file.len() + sections.len() * 40;
    let mut cursor = header_end as u32;
    let mut data_ptrs = vec![0u32; sections.len()];
    let mut reloc_ptrs = vec![0u32; sections.len()];
    for (i, s) in sections.iter().enumerate() {
        if s.size_override.is_some() {
            continue; // .bss carries no file data
        }
        data_ptrs[i] = cursor;
        cursor += s.data.len() as u32;
        if !s.relocs.is_empty() {
            reloc_ptrs[i] = cursor;
            cursor += s.relocs.len() as u32 * 10;
        }
    }
    let symtab_ptr = cursor;

    for (i, s) in sections.iter().enumerate() {
        write_section_header(&mut file, s, data_ptrs[i], reloc_ptrs[i]);
    }
    for s in &sections {
        if s.size_override.is_some() {
            continue;
        }
        file.bytes(&s.data);
        for &(offset, sym, ty) in &s.relocs {
            file.u32(offset);
            file.u32(sym);
            file.u16(ty);
        }
    }
    file.patch_u32(symtab_ptr_patch_at, symtab_ptr);
    file.bytes(symtab.as_slice());
    file.bytes(strtab_final.as_slice());

    *out = file;
}

fn find_section_symbol(w: &ObjectWriter, tag: SectionTag, orig_to_final: &HashMap<*const Symbol, u32>) -> u32 {
    w.symbols
        .symbols
        .iter()
        .find(|s| s.section == tag && matches!(s.kind, SymbolKind::Section))
        .or_else(|| w.symbols.symbols.iter().find(|s| s.section == tag))
        .and_then(|s| orig_to_final.get(&(s as *const Symbol)))
        .copied()
        .unwrap_or(0)
}

fn write_sym_name(buf: &mut Buffer, name: &str, intern: &mut impl FnMut(&str) -> u32) {
    if name.len() <= 8 {
        let mut field = [0u8; 8];
        field[..name.len()].copy_from_slice(name.as_bytes());
        buf.bytes(&field);
    } else {
        buf.u32(0);
        buf.u32(intern(name));
    }
}

#[allow(clippy::too_many_arguments)]
fn write_section_header(buf: &mut Buffer, s: &SectionPlan, data_ptr: u32, reloc_ptr: u32) {
    let mut name_field = [0u8; 8];
    let name_bytes = s.name.as_bytes();
    name_field[..name_bytes.len().min(8)].copy_from_slice(&name_bytes[..name_bytes.len().min(8)]);
    buf.bytes(&name_field);
    let size = s.size_override.unwrap_or(s.data.len() as u32);
    buf.u32(0); // VirtualSize, meaningless in an object file
    buf.u32(0); // VirtualAddress
    buf.u32(size);
    buf.u32(if s.size_override.is_some() { 0 } else { data_ptr });
    buf.u32(reloc_ptr);
    buf.u32(0); // pointer to line numbers
    buf.u16(s.relocs.len().min(0xffff) as u16);
    buf.u16(0); // number of line numbers
    buf.u32(s.characteristics.bits());
}

fn coff_section_number(tag: SectionTag, index_of: &HashMap<SectionTag, u16>) -> i16 {
    match tag {
        SectionTag::Undefined => IMAGE_SYM_UNDEFINED,
        SectionTag::Absolute => -1,
        other => index_of.get(&other).copied().unwrap_or(0) as i16,
    }
}

fn coff_storage_class(binding: Binding, section: SectionTag) -> u8 {
    match (binding, section) {
        (Binding::Weak, _) => IMAGE_SYM_CLASS_WEAK_EXTERNAL,
        (Binding::Global, _) => IMAGE_SYM_CLASS_EXTERNAL,
        (Binding::Local, SectionTag::Undefined) => IMAGE_SYM_CLASS_EXTERNAL,
        (Binding::Local, _) => IMAGE_SYM_CLASS_STATIC,
    }
}

fn coff_reloc_type(ty: u32) -> u16 {
    ty as u16
}

fn reloc_type_to_common(ty: u16) -> u32 {
    ty as u32
}

/// Parses a COFF relocatable object, extracting `.text`/`.data`/
/// `.rdata`/`.bss`, the symbol table, `/DEFAULTLIB:` tokens from
/// `.drectve`, and per-section relocations. `.debug$S`/`.debug$T` are
/// ignored: the linker never consults them.
pub fn read(bytes: &[u8]) -> CoreResult<ParsedObject> {
    if bytes.len() < 20 {
        return Err(CoreError::malformed_object("COFF object truncated before file header"));
    }
    let machine = u16::from_le_bytes(bytes[0..2].try_into().unwrap());
    if machine != IMAGE_FILE_MACHINE_AMD64 {
        return Err(CoreError::malformed_object("unsupported COFF machine type"));
    }
    let num_sections = u16::from_le_bytes(bytes[2..4].try_into().unwrap()) as usize;
    let symtab_ptr = u32::from_le_bytes(bytes[8..12].try_into().unwrap()) as usize;
    let num_symbols = u32::from_le_bytes(bytes[12..16].try_into().unwrap()) as usize;

    let mut shdrs = Vec::with_capacity(num_sections);
    let header_base = 20;
    for i in 0..num_sections {
        let base = header_base + i * 40;
        let h = bytes
            .get(base..base + 40)
            .ok_or_else(|| CoreError::malformed_object("COFF section header table runs past EOF"))?;
        let mut name_field = [0u8; 8];
        name_field.copy_from_slice(&h[0..8]);
        shdrs.push(CoffShdr {
            name_field,
            size: u32::from_le_bytes(h[16..20].try_into().unwrap()),
            data_ptr: u32::from_le_bytes(h[20..24].try_into().unwrap()),
            reloc_ptr: u32::from_le_bytes(h[24..28].try_into().unwrap()),
            num_relocs: u16::from_le_bytes(h[32..34].try_into().unwrap()),
        });
    }

    let strtab_offset = symtab_ptr + num_symbols * 18;
    let strtab = bytes.get(strtab_offset..).unwrap_or(&[]);
    let name_of = |field: &[u8; 8]| -> String {
        if field[0] == 0 && field[1] == 0 && field[2] == 0 && field[3] == 0 {
            let off = u32::from_le_bytes(field[4..8].try_into().unwrap()) as usize;
            read_cstr(strtab, off)
        } else {
            let end = field.iter().position(|&b| b == 0).unwrap_or(8);
            String::from_utf8_lossy(&field[..end]).into_owned()
        }
    };

    let mut out = ParsedObject::default();
    let mut index_to_tag: HashMap<usize, SectionTag> = HashMap::new();
    for (i, s) in shdrs.iter().enumerate() {
        let name = name_of(&s.name_field);
        match name.as_str() {
            ".text" => {
                out.text = section_bytes(bytes, s)?.to_vec();
                index_to_tag.insert(i, SectionTag::Text);
            }
            ".data" => {
                out.data = section_bytes(bytes, s)?.to_vec();
                index_to_tag.insert(i, SectionTag::Data);
            }
            ".rdata" => {
                out.rdata = section_bytes(bytes, s)?.to_vec();
                index_to_tag.insert(i, SectionTag::Rdata);
            }
            ".bss" => {
                out.bss_size = s.size as u64;
                index_to_tag.insert(i, SectionTag::Bss);
            }
            ".drectve" => {
                let text = String::from_utf8_lossy(section_bytes(bytes, s)?);
                for tok in text.split_whitespace() {
                    if let Some(lib) = tok.strip_prefix("/DEFAULTLIB:") {
                        out.default_libs.push(lib.trim_matches('"').to_string());
                    }
                }
            }
            _ => {}
        }
    }

    let mut symbols_by_index: Vec<Symbol> = Vec::with_capacity(num_symbols);
    let mut i = 0usize;
    while i < num_symbols {
        let base = symtab_ptr + i * 18;
        let rec = bytes
            .get(base..base + 18)
            .ok_or_else(|| CoreError::malformed_object("COFF symbol table runs past EOF"))?;
        let mut name_field = [0u8; 8];
        name_field.copy_from_slice(&rec[0..8]);
        let value = i32::from_le_bytes(rec[8..12].try_into().unwrap());
        let section_number = i16::from_le_bytes(rec[12..14].try_into().unwrap());
        let storage_class = rec[16];
        let num_aux = rec[17] as usize;
        let name = name_of(&name_field);

        let section = if section_number == IMAGE_SYM_UNDEFINED {
            SectionTag::Undefined
        } else if section_number < 0 {
            SectionTag::Absolute
        } else {
            index_to_tag.get(&(section_number as usize - 1)).copied().unwrap_or(SectionTag::Undefined)
        };
        let binding = match storage_class {
            IMAGE_SYM_CLASS_WEAK_EXTERNAL => Binding::Weak,
            IMAGE_SYM_CLASS_EXTERNAL => Binding::Global,
            _ => Binding::Local,
        };
        symbols_by_index.push(Symbol {
            name,
            value: value as u64,
            section,
            binding,
            kind: if section == SectionTag::Undefined { SymbolKind::Notype } else { SymbolKind::Func },
            size: None,
        });
        i += 1 + num_aux;
    }
    out.symbols = symbols_by_index;

    for (i, s) in shdrs.iter().enumerate() {
        let Some(&tag) = index_to_tag.get(&i) else { continue };
        if s.num_relocs == 0 {
            continue;
        }
        let mut list = Vec::with_capacity(s.num_relocs as usize);
        for r in 0..s.num_relocs as usize {
            let base = s.reloc_ptr as usize + r * 10;
            let rec = bytes
                .get(base..base + 10)
                .ok_or_else(|| CoreError::malformed_object("COFF relocation table runs past EOF"))?;
            let offset = u32::from_le_bytes(rec[0..4].try_into().unwrap());
            let sym_index = u32::from_le_bytes(rec[4..8].try_into().unwrap());
            let ty = u16::from_le_bytes(rec[8..10].try_into().unwrap());
            list.push(Relocation::new(offset as u64, tag, sym_index, reloc_type_to_common(ty), 0));
        }
        out.relocations.entry(tag).or_default().extend(list);
    }

    Ok(out)
}

struct CoffShdr {
    name_field: [u8; 8],
    size: u32,
    data_ptr: u32,
    reloc_ptr: u32,
    num_relocs: u16,
}

fn section_bytes<'a>(bytes: &'a [u8], s: &CoffShdr) -> CoreResult<&'a [u8]> {
    let start = s.data_ptr as usize;
    let end = start + s.size as usize;
    bytes
        .get(start..end)
        .ok_or_else(|| CoreError::malformed_object("COFF section data runs past EOF"))
}

fn read_cstr(table: &[u8], offset: usize) -> String {
    if offset >= table.len() {
        return String::new();
    }
    let end = table[offset..].iter().position(|&b| b == 0).map(|p| offset + p).unwrap_or(table.len());
    String::from_utf8_lossy(&table[offset..end]).into_owned()
}
