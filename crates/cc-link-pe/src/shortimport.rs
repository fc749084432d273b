//! Parses a Microsoft "short import" object, the member shape a
//! `.lib` import library uses instead of a real COFF `.obj` for each
//! function it re-exports from a DLL. Identified by the COFF file
//! header's `Machine`/`NumberOfSections` fields reading as the
//! signature pair `0x0000, 0xFFFF`, which no genuine COFF object can
//! produce (`NumberOfSections` would never legitimately be `0xFFFF`).

use cc_common::{CoreError, CoreResult};

pub const SIG1_UNKNOWN_MACHINE: u16 = 0;
pub const SIG2_IMPORT_MARKER: u16 = 0xFFFF;

/// One `.lib`-supplied import: the function name the archive's symbol
/// index was searched under, the DLL that exports it, and the ordinal
/// hint the loader should try first before falling back to a by-name
/// lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShortImport {
    pub func_name: String,
    pub dll_name: String,
    pub ordinal_hint: u16,
}

/// `true` if `data` looks like a short import object header rather
/// than a regular COFF object.
pub fn is_short_import(data: &[u8]) -> bool {
    data.len() >= 4
        && u16::from_le_bytes([data[0], data[1]]) == SIG1_UNKNOWN_MACHINE
        && u16::from_le_bytes([data[2], data[3]]) == SIG2_IMPORT_MARKER
}

/// Parses the 20-byte `IMPORT_OBJECT_HEADER` followed by two
/// NUL-terminated strings (import name, then DLL name).
pub fn parse(data: &[u8]) -> CoreResult<ShortImport> {
    if data.len() < 20 {
        return Err(CoreError::malformed_object("truncated short import object header"));
    }
    if !is_short_import(data) {
        return Err(CoreError::malformed_object("not a short import object (bad signature)"));
    }
    let ordinal_hint = u16::from_le_bytes(data[14..16].try_into().unwrap());

    let strings = &data[20..];
    let mut parts = strings.split(|&b| b == 0);
    let func_name = parts
        .next()
        .map(|s| String::from_utf8_lossy(s).into_owned())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| CoreError::malformed_object("short import object missing import name"))?;
    let dll_name = parts
        .next()
        .map(|s| String::from_utf8_lossy(s).into_owned())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| CoreError::malformed_object("short import object missing DLL name"))?;

    Ok(ShortImport {
        func_name,
        dll_name,
        ordinal_hint,
    })
}

/// Builds a short import object member's raw bytes; used by this
/// module's own tests and by `cc-link-pe`'s archive-resolution tests.
#[cfg(test)]
pub(crate) fn build(func_name: &str, dll_name: &str, ordinal_hint: u16) -> Vec<u8> {
    let mut strings = Vec::new();
    strings.extend_from_slice(func_name.as_bytes());
    strings.push(0);
    strings.extend_from_slice(dll_name.as_bytes());
    strings.push(0);

    let mut out = Vec::new();
    out.extend_from_slice(&SIG1_UNKNOWN_MACHINE.to_le_bytes());
    out.extend_from_slice(&SIG2_IMPORT_MARKER.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes()); // Version
    out.extend_from_slice(&0x8664u16.to_le_bytes()); // Machine
    out.extend_from_slice(&0u32.to_le_bytes()); // TimeDateStamp
    out.extend_from_slice(&(strings.len() as u32).to_le_bytes()); // SizeOfData
    out.extend_from_slice(&ordinal_hint.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes()); // Type/NameType bitfield, plain import-by-name
    out.extend_from_slice(&strings);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_func_and_dll_name() {
        let raw = build("printf", "ucrtbase.dll", 42);
        let imp = parse(&raw).unwrap();
        assert_eq!(imp.func_name, "printf");
        assert_eq!(imp.dll_name, "ucrtbase.dll");
        assert_eq!(imp.ordinal_hint, 42);
    }

    #[test]
    fn regular_coff_header_is_not_mistaken_for_an_import() {
        // A real COFF object header starts with Machine = 0x8664.
        let coff_like = [0x64u8, 0x86, 0x01, 0x00];
        assert!(!is_short_import(&coff_like));
    }

    #[test]
    fn truncated_data_is_rejected() {
        assert!(parse(&[0u8; 10]).is_err());
    }
}
