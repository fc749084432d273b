//! ELF64 relocatable object emission and parsing (System V AMD64 ABI).
//! Layout: file header, then each non-empty section's raw data, then
//! `.symtab`/`.strtab`/`.shstrtab`, then the section header table last
//! — the header table's position is recorded in `e_shoff` so section
//! order in the file need not match section-header-table order.

use crate::{DebugInfo, ObjectWriter, ParsedObject};
use cc_common::{Buffer, CoreError, CoreResult};
use cc_link::{Binding, Relocation, SectionTag, Symbol, SymbolKind};
use std::collections::HashMap;

pub const EM_X86_64: u16 = 62;
pub const ET_REL: u16 = 1;

const SHT_NULL: u32 = 0;
const SHT_PROGBITS: u32 = 1;
const SHT_SYMTAB: u32 = 2;
const SHT_STRTAB: u32 = 3;
const SHT_RELA: u32 = 4;
const SHT_NOBITS: u32 = 8;

const SHF_WRITE: u64 = 0x1;
const SHF_ALLOC: u64 = 0x2;
const SHF_EXECINSTR: u64 = 0x4;

const STB_LOCAL: u8 = 0;
const STB_GLOBAL: u8 = 1;
const STB_WEAK: u8 = 2;

const STT_NOTYPE: u8 = 0;
const STT_OBJECT: u8 = 1;
const STT_FUNC: u8 = 2;
const STT_SECTION: u8 = 3;
const STT_FILE: u8 = 4;

pub const R_X86_64_64: u32 = 1;
pub const R_X86_64_PC32: u32 = 2;
pub const R_X86_64_PLT32: u32 = 4;
pub const R_X86_64_32: u32 = 10;
pub const R_X86_64_32S: u32 = 11;

const SHN_UNDEF: u16 = 0;
const SHN_ABS: u16 = 0xfff1;

struct SectionPlan {
    name: &'static str,
    tag: Option<SectionTag>,
    sh_type: u32,
    flags: u64,
    data: Vec<u8>,
    size_override: Option<u64>,
}

/// Writes `w` as an ELF64 relocatable object to `out`.
pub fn write(w: &ObjectWriter, out: &mut Buffer) {
    log::debug!("writing ELF64 object ({} symbols)", w.symbols.len());

    let mut sections = vec![SectionPlan {
        name: "",
        tag: None,
        sh_type: SHT_NULL,
        flags: 0,
        data: Vec::new(),
        size_override: None,
    }];

    if !w.text.is_empty() {
        sections.push(SectionPlan {
            name: ".text",
            tag: Some(SectionTag::Text),
            sh_type: SHT_PROGBITS,
            flags: SHF_ALLOC | SHF_EXECINSTR,
            data: w.text.clone(),
            size_override: None,
        });
    }
    if !w.data.is_empty() {
        sections.push(SectionPlan {
            name: ".data",
            tag: Some(SectionTag::Data),
            sh_type: SHT_PROGBITS,
            flags: SHF_ALLOC | SHF_WRITE,
            data: w.data.clone(),
            size_override: None,
        });
    }
    if !w.rdata.is_empty() {
        sections.push(SectionPlan {
            name: ".rodata",
            tag: Some(SectionTag::Rdata),
            sh_type: SHT_PROGBITS,
            flags: SHF_ALLOC,
            data: w.rdata.clone(),
            size_override: None,
        });
    }
    if w.bss_size > 0 {
        sections.push(SectionPlan {
            name: ".bss",
            tag: Some(SectionTag::Bss),
            sh_type: SHT_NOBITS,
            flags: SHF_ALLOC | SHF_WRITE,
            data: Vec::new(),
            size_override: Some(w.bss_size),
        });
    }

    let section_index_of: HashMap<SectionTag, u16> = sections
        .iter()
        .enumerate()
        .filter_map(|(i, s)| s.tag.map(|t| (t, i as u16)))
        .collect();

    // Symbols: locals first (ELF requires all STB_LOCAL symbols to
    // precede the first global in .symtab), then globals/weaks.
    let mut locals: Vec<&Symbol> = Vec::new();
    let mut globals: Vec<&Symbol> = Vec::new();
    for sym in &w.symbols.symbols {
        match sym.binding {
            Binding::Local => locals.push(sym),
            Binding::Weak | Binding::Global => globals.push(sym),
        }
    }
    let mut orig_to_final: HashMap<*const Symbol, u32> = HashMap::new();
    let mut strtab = Buffer::new();
    strtab.u8(0);
    let mut symtab = Buffer::new();
    write_sym(&mut symtab, 0, 0, 0, STB_LOCAL, STT_NOTYPE, 0, 0); // null symbol
    let mut next_index = 1u32;
    for sym in locals.iter().chain(globals.iter()) {
        let name_off = if sym.name.is_empty() { 0 } else { strtab.len() as u32 };
        if !sym.name.is_empty() {
            strtab.cstr(&sym.name);
        }
        let shndx = elf_shndx(sym.section, &section_index_of);
        write_sym(
            &mut symtab,
            name_off,
            sym.value,
            sym.size.unwrap_or(0),
            elf_binding(sym.binding),
            elf_kind(sym.kind),
            shndx,
            0,
        );
        orig_to_final.insert(*sym as *const Symbol, next_index);
        next_index += 1;
    }
    let num_locals = locals.len() as u32 + 1; // +1 for the null symbol

    sections.push(SectionPlan {
        name: ".symtab",
        tag: None,
        sh_type: SHT_SYMTAB,
        flags: 0,
        data: symtab.into_vec(),
        size_override: None,
    });
    let symtab_section_index = sections.len() - 1;
    sections.push(SectionPlan {
        name: ".strtab",
        tag: None,
        sh_type: SHT_STRTAB,
        flags: 0,
        data: strtab.into_vec(),
        size_override: None,
    });
    let strtab_section_index = sections.len() - 1;

    // Relocations, one .rela section per section that has any.
    let mut rela_sections: Vec<(String, u16, Vec<u8>)> = Vec::new();
    for (tag, relocs) in &w.relocations {
        let Some(&target_shndx) = section_index_of.get(tag) else {
            continue;
        };
        let mut buf = Buffer::new();
        for r in relocs {
            let sym_index = w
                .symbols
                .symbols
                .get(r.symbol as usize)
                .and_then(|s| orig_to_final.get(&(s as *const Symbol)))
                .copied()
                .unwrap_or(0);
            buf.u64(r.offset);
            buf.u64(((sym_index as u64) << 32) | r.reloc_type as u64);
            buf.i64(r.addend);
        }
        let name = format!(".rela{}", section_name(*tag));
        rela_sections.push((name, target_shndx, buf.into_vec()));
    }

    let mut shstrtab = Buffer::new();
    shstrtab.u8(0);
    let mut name_offsets: Vec<u32> = Vec::with_capacity(sections.len() + rela_sections.len());
    for s in &sections {
        if s.name.is_empty() {
            name_offsets.push(0);
        } else {
            name_offsets.push(shstrtab.len() as u32);
            shstrtab.cstr(s.name);
        }
    }
    let mut rela_name_offsets = Vec::with_capacity(rela_sections.len());
    for (name, ..) in &rela_sections {
        rela_name_offsets.push(shstrtab.len() as u32);
        shstrtab.cstr(name);
    }
    let shstrtab_name_offset = shstrtab.len() as u32;
    shstrtab.cstr(".shstrtab");

    sections.push(SectionPlan {
        name: ".shstrtab",
        tag: None,
        sh_type: SHT_STRTAB,
        flags: 0,
        data: shstrtab.into_vec(),
        size_override: None,
    });
    let shstrtab_section_index = sections.len() - 1;
    name_offsets.push(shstrtab_name_offset);

    let total_non_null_and_rela = sections.len() - 1 + rela_sections.len();
    let shnum = total_non_null_and_rela + 1; // +1 for the null section

    let mut file = Buffer::new();
    // ELF header, patched once offsets are known.
    file.bytes(&[0x7f, b'E', b'L', b'F', 2, 1, 1, 0]);
    file.bytes(&[0u8; 8]); // e_ident padding
    file.u16(ET_REL);
    file.u16(EM_X86_64);
    file.u32(1); // e_version
    file.u64(0); // e_entry
    file.u64(0); // e_phoff
    let e_shoff_patch_at = file.len();
    file.u64(0); // e_shoff, patched below
    file.u32(0); // e_flags
    file.u16(64); // e_ehsize
    file.u16(0); // e_phentsize
    file.u16(0); // e_phnum
    file.u16(64); // e_shentsize
    file.u16(shnum as u16);
    file.u16(shstrtab_section_index as u16 + 1); // +1: section header table includes a leading null entry

    let mut offsets = vec![0u64; sections.len()];
    for (i, s) in sections.iter().enumerate() {
        if s.sh_type == SHT_NULL || s.sh_type == SHT_NOBITS {
            continue;
        }
        offsets[i] = file.len() as u64;
        file.bytes(&s.data);
    }
    let mut rela_offsets = vec![0u64; rela_sections.len()];
    for (i, (_, _, data)) in rela_sections.iter().enumerate() {
        rela_offsets[i] = file.len() as u64;
        file.bytes(data);
    }

    let shoff = file.len() as u64;
    // Leading null section header.
    for _ in 0..64 {
        file.u8(0);
    }
    for (i, s) in sections.iter().enumerate() {
        if s.sh_type == SHT_NULL {
            continue;
        }
        let (link, info) = if i == symtab_section_index {
            (strtab_section_index as u32 + 1, num_locals)
        } else {
            (0, 0)
        };
        let size = s.size_override.unwrap_or(s.data.len() as u64);
        write_shdr(
            &mut file,
            name_offsets[i],
            s.sh_type,
            s.flags,
            offsets[i],
            size,
            link,
            info,
            if s.sh_type == SHT_SYMTAB { 24 } else { 1 },
            if s.sh_type == SHT_SYMTAB { 24 } else { 0 },
        );
    }
    for (i, (_, target_shndx, data)) in rela_sections.iter().enumerate() {
        write_shdr(
            &mut file,
            rela_name_offsets[i],
            SHT_RELA,
            0,
            rela_offsets[i],
            data.len() as u64,
            symtab_section_index as u32 + 1,
            *target_shndx as u32,
            8,
            24,
        );
    }

    file.patch_u64(e_shoff_patch_at, shoff);
    *out = file;
}

fn section_name(tag: SectionTag) -> &'static str {
    match tag {
        SectionTag::Text => ".text",
        SectionTag::Data => ".data",
        SectionTag::Rdata => ".rodata",
        SectionTag::Bss => ".bss",
        SectionTag::Undefined | SectionTag::Absolute => "",
    }
}

fn elf_shndx(tag: SectionTag, index_of: &HashMap<SectionTag, u16>) -> u16 {
    match tag {
        SectionTag::Undefined => SHN_UNDEF,
        SectionTag::Absolute => SHN_ABS,
        other => index_of.get(&other).map(|&i| i + 1).unwrap_or(SHN_UNDEF),
    }
}

fn elf_binding(b: Binding) -> u8 {
    match b {
        Binding::Local => STB_LOCAL,
        Binding::Global => STB_GLOBAL,
        Binding::Weak => STB_WEAK,
    }
}

fn elf_kind(k: SymbolKind) -> u8 {
    match k {
        SymbolKind::Notype => STT_NOTYPE,
        SymbolKind::Object => STT_OBJECT,
        SymbolKind::Func => STT_FUNC,
        SymbolKind::Section => STT_SECTION,
        SymbolKind::File => STT_FILE,
    }
}

#[allow(clippy::too_many_arguments)]
fn write_sym(buf: &mut Buffer, name: u32, value: u64, size: u64, bind: u8, kind: u8, shndx: u16, other: u8) {
    buf.u32(name);
    buf.u8((bind << 4) | (kind & 0xf));
    buf.u8(other);
    buf.u16(shndx);
    buf.u64(value);
    buf.u64(size);
}

#[allow(clippy::too_many_arguments)]
fn write_shdr(
    buf: &mut Buffer,
    name: u32,
    sh_type: u32,
    flags: u64,
    offset: u64,
    size: u64,
    link: u32,
    info: u32,
    addralign: u64,
    entsize: u64,
) {
    buf.u32(name);
    buf.u32(sh_type);
    buf.u64(flags);
    buf.u64(0); // sh_addr
    buf.u64(offset);
    buf.u64(size);
    buf.u32(link);
    buf.u32(info);
    buf.u64(addralign);
    buf.u64(entsize);
}

/// Parses an ELF64 relocatable object, extracting `.text`/`.data`/
/// `.rodata`/`.bss`, the symbol table, and any `.rela.*` relocations.
/// Debug sections are ignored — the linker never consults them.
pub fn read(bytes: &[u8]) -> CoreResult<ParsedObject> {
    if bytes.len() < 64 || &bytes[0..4] != [0x7f, b'E', b'L', b'F'] {
        return Err(CoreError::malformed_object("bad ELF magic"));
    }
    if bytes[4] != 2 {
        return Err(CoreError::malformed_object("only ELF64 objects are supported"));
    }
    let shoff = u64::from_le_bytes(bytes[0x28..0x30].try_into().unwrap()) as usize;
    let shentsize = u16::from_le_bytes(bytes[0x3a..0x3c].try_into().unwrap()) as usize;
    let shnum = u16::from_le_bytes(bytes[0x3c..0x3e].try_into().unwrap()) as usize;
    let shstrndx = u16::from_le_bytes(bytes[0x3e..0x40].try_into().unwrap()) as usize;

    if shoff + shnum * shentsize > bytes.len() {
        return Err(CoreError::malformed_object("ELF section header table runs past EOF"));
    }

    let mut shdrs = Vec::with_capacity(shnum);
    for i in 0..shnum {
        let base = shoff + i * shentsize;
        let h = &bytes[base..base + 64];
        shdrs.push(Shdr {
            name: u32::from_le_bytes(h[0..4].try_into().unwrap()),
            sh_type: u32::from_le_bytes(h[4..8].try_into().unwrap()),
            offset: u64::from_le_bytes(h[24..32].try_into().unwrap()),
            size: u64::from_le_bytes(h[32..40].try_into().unwrap()),
            link: u32::from_le_bytes(h[40..44].try_into().unwrap()),
            info: u32::from_le_bytes(h[44..48].try_into().unwrap()),
        });
    }
    if shstrndx >= shdrs.len() {
        return Err(CoreError::malformed_object("ELF shstrndx out of range"));
    }
    let shstrtab = section_bytes(bytes, &shdrs[shstrndx])?;
    let name_of = |off: u32| -> String { read_cstr(shstrtab, off as usize) };

    let mut name_to_index: HashMap<String, usize> = HashMap::new();
    for (i, s) in shdrs.iter().enumerate() {
        name_to_index.insert(name_of(s.name), i);
    }
    let tag_of_section = |name: &str| -> Option<SectionTag> {
        match name {
            ".text" => Some(SectionTag::Text),
            ".data" => Some(SectionTag::Data),
            ".rodata" => Some(SectionTag::Rdata),
            ".bss" => Some(SectionTag::Bss),
            _ => None,
        }
    };
    let mut index_to_tag: HashMap<usize, SectionTag> = HashMap::new();
    for (i, s) in shdrs.iter().enumerate() {
        if let Some(t) = tag_of_section(&name_of(s.name)) {
            index_to_tag.insert(i, t);
        }
    }

    let mut out = ParsedObject::default();
    if let Some(&i) = name_to_index.get(".text") {
        out.text = section_bytes(bytes, &shdrs[i])?.to_vec();
    }
    if let Some(&i) = name_to_index.get(".data") {
        out.data = section_bytes(bytes, &shdrs[i])?.to_vec();
    }
    if let Some(&i) = name_to_index.get(".rodata") {
        out.rdata = section_bytes(bytes, &shdrs[i])?.to_vec();
    }
    if let Some(&i) = name_to_index.get(".bss") {
        out.bss_size = shdrs[i].size;
    }

    let symtab_index = shdrs.iter().position(|s| s.sh_type == SHT_SYMTAB);
    let mut local_count = 0u32;
    if let Some(si) = symtab_index {
        local_count = shdrs[si].info;
        let symtab = section_bytes(bytes, &shdrs[si])?;
        let strtab = section_bytes(bytes, &shdrs[shdrs[si].link as usize])?;
        let count = symtab.len() / 24;
        for i in 0..count {
            let s = &symtab[i * 24..i * 24 + 24];
            let name_off = u32::from_le_bytes(s[0..4].try_into().unwrap());
            let info = s[4];
            let shndx = u16::from_le_bytes(s[6..8].try_into().unwrap());
            let value = u64::from_le_bytes(s[8..16].try_into().unwrap());
            let size = u64::from_le_bytes(s[16..24].try_into().unwrap());
            let name = read_cstr(strtab, name_off as usize);
            if i == 0 && name.is_empty() {
                out.symbols.push(Symbol {
                    name: String::new(),
                    value: 0,
                    section: SectionTag::Undefined,
                    binding: Binding::Local,
                    kind: SymbolKind::Notype,
                    size: None,
                });
                continue;
            }
            let binding = if i < local_count as usize {
                Binding::Local
            } else {
                match info >> 4 {
                    2 => Binding::Weak,
                    _ => Binding::Global,
                }
            };
            let kind = match info & 0xf {
                1 => SymbolKind::Object,
                2 => SymbolKind::Func,
                3 => SymbolKind::Section,
                4 => SymbolKind::File,
                _ => SymbolKind::Notype,
            };
            let section = if shndx == SHN_UNDEF {
                SectionTag::Undefined
            } else if shndx == SHN_ABS {
                SectionTag::Absolute
            } else {
                index_to_tag.get(&(shndx as usize)).copied().unwrap_or(SectionTag::Undefined)
            };
            out.symbols.push(Symbol {
                name,
                value,
                section,
                binding,
                kind,
                size: if size == 0 { None } else { Some(size) },
            });
        }
    }

    for s in &shdrs {
        if s.sh_type != SHT_RELA {
            continue;
        }
        let Some(&target) = index_to_tag.get(&(s.info as usize)) else {
            continue;
        };
        let bytes_rela = section_bytes(bytes, s)?;
        let count = bytes_rela.len() / 24;
        let mut list = Vec::with_capacity(count);
        for i in 0..count {
            let r = &bytes_rela[i * 24..i * 24 + 24];
            let offset = u64::from_le_bytes(r[0..8].try_into().unwrap());
            let info = u64::from_le_bytes(r[8..16].try_into().unwrap());
            let addend = i64::from_le_bytes(r[16..24].try_into().unwrap());
            list.push(Relocation::new(offset, target, (info >> 32) as u32, (info & 0xffff_ffff) as u32, addend));
        }
        out.relocations.entry(target).or_default().extend(list);
    }

    Ok(out)
}

struct Shdr {
    name: u32,
    sh_type: u32,
    offset: u64,
    size: u64,
    link: u32,
    info: u32,
}

fn section_bytes<'a>(bytes: &'a [u8], s: &Shdr) -> CoreResult<&'a [u8]> {
    let start = s.offset as usize;
    let end = start + s.size as usize;
    bytes
        .get(start..end)
        .ok_or_else(|| CoreError::malformed_object("ELF section data runs past EOF"))
}

/// Reads a NUL-terminated string starting at `offset` in `table`.
fn read_cstr(table: &[u8], offset: usize) -> String {
    let end = table[offset..].iter().position(|&b| b == 0).map(|p| offset + p).unwrap_or(table.len());
    String::from_utf8_lossy(&table[offset..end]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ObjectWriter;
    use cc_link::{Binding, SymbolKind};

    fn sample_object() -> ObjectWriter {
        let mut w = ObjectWriter::new();
        w.text = vec![0xb8, 0x2a, 0x00, 0x00, 0x00, 0xc3]; // mov eax,42; ret
        w.add_symbol(Symbol::new("main", 0, SectionTag::Text, Binding::Global, SymbolKind::Func));
        w.add_symbol(Symbol::undefined("puts", Binding::Global));
        w.add_relocation(Relocation::new(2, SectionTag::Text, 1, R_X86_64_PC32, -4));
        w
    }

    #[test]
    fn round_trips_text_bytes_and_symbols() {
        let w = sample_object();
        let mut buf = Buffer::new();
        write(&w, &mut buf);
        let parsed = read(buf.as_slice()).unwrap();

        assert_eq!(parsed.text, w.text);
        let main_sym = parsed.symbols.iter().find(|s| s.name == "main").unwrap();
        assert!(main_sym.is_defined());
        assert_eq!(main_sym.section, SectionTag::Text);
        let puts_sym = parsed.symbols.iter().find(|s| s.name == "puts").unwrap();
        assert!(!puts_sym.is_defined());
    }

    #[test]
    fn round_trips_relocations() {
        let w = sample_object();
        let mut buf = Buffer::new();
        write(&w, &mut buf);
        let parsed = read(buf.as_slice()).unwrap();
        let relocs = &parsed.relocations[&SectionTag::Text];
        assert_eq!(relocs.len(), 1);
        assert_eq!(relocs[0].offset, 2);
        assert_eq!(relocs[0].reloc_type, R_X86_64_PC32);
        assert_eq!(relocs[0].addend, -4);
    }

    #[test]
    fn bad_magic_is_rejected() {
        assert!(read(&[0u8; 64]).is_err());
    }
}
