//! `ar`-format archive parsing, shared by both linkers: a Unix static
//! library (`.a`) and a Microsoft import/static library (`.lib`) are the
//! same container format — a global `!<arch>\n` magic, a sequence of
//! 60-byte member headers each followed by the member's (even-padded)
//! data, a special `/` member holding the archive's own name-sorted
//! symbol index, and an optional `//` member holding a long-name table
//! for members whose name doesn't fit in the 16-byte header field.
//!
//! This module only parses the container; it does not interpret member
//! contents (`cc-link-elf`/`cc-link-pe` hand each member's bytes to
//! `cc-objwriter`'s readers or to the short-import-object reader).

use cc_common::{CoreError, CoreResult};
use hashbrown::HashMap;

pub struct ArchiveMember<'a> {
    pub name: String,
    pub data: &'a [u8],
}

pub struct Archive<'a> {
    members: HashMap<u64, ArchiveMember<'a>>,
    /// `(symbol name, member header offset)`, in the order the
    /// archive's own index lists them.
    pub symbol_index: Vec<(String, u64)>,
}

const MAGIC: &[u8; 8] = b"!<arch>\n";
const HEADER_LEN: usize = 60;

impl<'a> Archive<'a> {
    pub fn parse(data: &'a [u8]) -> CoreResult<Self> {
        if data.len() < MAGIC.len() || &data[..MAGIC.len()] != MAGIC {
            return Err(CoreError::malformed_object("not an ar archive (bad magic)"));
        }

        let mut offset = MAGIC.len();
        let mut members = HashMap::new();
        let mut symbol_index = Vec::new();
        let mut long_names: &[u8] = &[];

        while offset + HEADER_LEN <= data.len() {
            let header_offset = offset as u64;
            let header = &data[offset..offset + HEADER_LEN];
            let raw_name = std::str::from_utf8(&header[0..16])
                .map_err(|_| CoreError::malformed_object("non-UTF8 ar member name"))?
                .trim_end();
            let size_str = std::str::from_utf8(&header[48..58])
                .map_err(|_| CoreError::malformed_object("non-UTF8 ar member size field"))?
                .trim();
            let size: usize = size_str
                .parse()
                .map_err(|_| CoreError::malformed_object("malformed ar member size field"))?;

            let data_start = offset + HEADER_LEN;
            if data_start + size > data.len() {
                return Err(CoreError::malformed_object("ar member data runs past end of file"));
            }
            let member_data = &data[data_start..data_start + size];

            if raw_name == "/" || raw_name == "/SYM64/" {
                symbol_index = parse_symbol_index(member_data)?;
            } else if raw_name == "//" {
                long_names = member_data;
            } else if let Some(rest) = raw_name.strip_prefix('/') {
                if let Ok(off) = rest.trim().parse::<usize>() {
                    members.insert(
                        header_offset,
                        ArchiveMember {
                            name: read_long_name(long_names, off),
                            data: member_data,
                        },
                    );
                }
            } else {
                members.insert(
                    header_offset,
                    ArchiveMember {
                        name: raw_name.trim_end_matches('/').to_string(),
                        data: member_data,
                    },
                );
            }

            offset = data_start + size;
            if size % 2 == 1 {
                offset += 1;
            }
        }

        Ok(Self { members, symbol_index })
    }

    /// Member header offsets whose archive-index entry names `symbol`.
    pub fn offsets_defining(&self, symbol: &str) -> Vec<u64> {
        self.symbol_index
            .iter()
            .filter(|(name, _)| name == symbol)
            .map(|(_, off)| *off)
            .collect()
    }

    pub fn member_at(&self, offset: u64) -> Option<&ArchiveMember<'a>> {
        self.members.get(&offset)
    }
}

fn parse_symbol_index(data: &[u8]) -> CoreResult<Vec<(String, u64)>> {
    if data.len() < 4 {
        return Err(CoreError::malformed_object("truncated archive symbol index"));
    }
    let count = u32::from_be_bytes(data[0..4].try_into().unwrap()) as usize;
    let offsets_end = 4 + count * 4;
    if data.len() < offsets_end {
        return Err(CoreError::malformed_object("truncated archive symbol index offsets"));
    }
    let mut offsets = Vec::with_capacity(count);
    for i in 0..count {
        let start = 4 + i * 4;
        offsets.push(u32::from_be_bytes(data[start..start + 4].try_into().unwrap()) as u64);
    }
    let names_blob = &data[offsets_end..];
    let mut names = names_blob
        .split(|&b| b == 0)
        .map(|s| String::from_utf8_lossy(s).into_owned());
    let mut result = Vec::with_capacity(count);
    for off in offsets {
        let name = names.next().unwrap_or_default();
        if !name.is_empty() {
            result.push((name, off));
        }
    }
    Ok(result)
}

fn read_long_name(table: &[u8], offset: usize) -> String {
    if offset >= table.len() {
        return String::new();
    }
    let end = table[offset..]
        .iter()
        .position(|&b| b == b'/' || b == b'\n')
        .map(|p| offset + p)
        .unwrap_or(table.len());
    String::from_utf8_lossy(&table[offset..end]).into_owned()
}

/// Builds a minimal `ar` archive in memory, one symbol per member named
/// after it; used by this module's own tests and by `cc-link-elf`/
/// `cc-link-pe`'s archive-resolution tests.
#[cfg(test)]
pub(crate) fn build_test_archive(members: &[(&str, &[u8])]) -> Vec<u8> {
    fn pad_field(s: &str, width: usize) -> Vec<u8> {
        let mut out = s.as_bytes().to_vec();
        out.resize(width, b' ');
        out
    }

    fn write_header(out: &mut Vec<u8>, name: &str, size: usize) {
        out.extend_from_slice(&pad_field(name, 16));
        out.extend_from_slice(&pad_field("0", 12));
        out.extend_from_slice(&pad_field("0", 6));
        out.extend_from_slice(&pad_field("0", 6));
        out.extend_from_slice(&pad_field("100644", 8));
        out.extend_from_slice(&pad_field(&size.to_string(), 10));
        out.extend_from_slice(b"`\n");
    }

    // Lay out the real members first (relative to where they'll land,
    // right after the symbol-index member) to learn each one's offset.
    let mut body = Vec::new();
    let mut member_offsets = Vec::new();
    for (name, data) in members {
        member_offsets.push(body.len());
        write_header(&mut body, name, data.len());
        body.extend_from_slice(data);
        if data.len() % 2 == 1 {
            body.push(b'\n');
        }
    }

    let mut symtab = Vec::new();
    symtab.extend_from_slice(&(members.len() as u32).to_be_bytes());
    let offsets_patch_at = symtab.len();
    symtab.extend(std::iter::repeat(0u8).take(4 * members.len()));
    for (name, _) in members {
        symtab.extend_from_slice(name.as_bytes());
        symtab.push(0);
    }

    let symtab_member_total = HEADER_LEN + symtab.len() + (symtab.len() % 2);
    let base = MAGIC.len() + symtab_member_total;
    for (i, off) in member_offsets.iter().enumerate() {
        let abs = (base + off) as u32;
        let p = offsets_patch_at + i * 4;
        symtab[p..p + 4].copy_from_slice(&abs.to_be_bytes());
    }

    let mut out = Vec::new();
    out.extend_from_slice(MAGIC);
    write_header(&mut out, "/", symtab.len());
    out.extend_from_slice(&symtab);
    if symtab.len() % 2 == 1 {
        out.push(b'\n');
    }
    out.extend_from_slice(&body);
    out
}
