//! Phase 2 — entry stub synthesis. The actual PE entry point is always
//! a small synthetic trampoline (`__pe_entry`), never the user's
//! `main`/`mainCRTStartup` directly: the Win64 calling convention needs
//! a 32-byte shadow space (plus 8 for 16-byte alignment at the call
//! site) reserved by the caller, argc/argv supplied for `main`, and the
//! process torn down with `ExitProcess` afterwards rather than falling
//! off the end of the function.

use cc_common::{align_up, Buffer, CoreResult};
use cc_link::{Binding, LinkerState, Relocation, SectionTag, Symbol, SymbolKind};
use cc_objwriter::coff::IMAGE_REL_AMD64_REL32;

const SECTION_ALIGN: u64 = 16;

/// `__pe_entry` when the requested entry is `main`:
/// ```text
/// sub rsp, 40           ; 32-byte shadow space + 8 for alignment
/// xor ecx, ecx          ; argc = 0
/// xor edx, edx          ; argv = NULL
/// call main             ; disp32 patched during relocation application
/// mov ecx, eax           ; main's return value becomes the exit code
/// call ExitProcess      ; disp32 patched; never returns
/// ```
fn build_main_stub() -> (Vec<u8>, u64, u64) {
    let bytes = vec![
        0x48, 0x83, 0xec, 0x28, // sub rsp, 40
        0x31, 0xc9, // xor ecx, ecx
        0x31, 0xd2, // xor edx, edx
        0xe8, 0x00, 0x00, 0x00, 0x00, // call main
        0x89, 0xc1, // mov ecx, eax
        0xe8, 0x00, 0x00, 0x00, 0x00, // call ExitProcess
    ];
    (bytes, 9, 16)
}

/// `__pe_entry` when the requested entry is `mainCRTStartup`: no
/// argc/argv marshalling (the UCRT startup routine builds those
/// itself from the process's raw command line), otherwise the same
/// shadow-space/call/exit shape.
fn build_crt_startup_stub() -> (Vec<u8>, u64, u64) {
    let bytes = vec![
        0x48, 0x83, 0xec, 0x28, // sub rsp, 40
        0xe8, 0x00, 0x00, 0x00, 0x00, // call mainCRTStartup
        0x89, 0xc1, // mov ecx, eax
        0xe8, 0x00, 0x00, 0x00, 0x00, // call ExitProcess
    ];
    (bytes, 5, 12)
}

/// Prepends `__pe_entry`'s stub to `.text`, shifts every pre-existing
/// `.text` symbol/relocation by its padded length, records relocations
/// for its `call entry`/`call ExitProcess` sites, and defines
/// `__ImageBase` as an absolute symbol carrying the final load address
/// (spec.md's "RVA semantics": `__ImageBase`'s value *is* the base all
/// other RVAs are relative to, so finalization must not rebase it
/// again).
pub fn synthesize(state: &mut LinkerState, entry: &str, image_base: u64) -> CoreResult<()> {
    let (stub, call_entry_off, call_exit_off) = if entry == "mainCRTStartup" {
        build_crt_startup_stub()
    } else {
        build_main_stub()
    };
    let padded_len = align_up(stub.len() as u64, SECTION_ALIGN);

    let mut prefix = Buffer::new();
    prefix.bytes(&stub);
    while (prefix.len() as u64) < padded_len {
        prefix.u8(0xcc); // int3 filler, unreachable past the ExitProcess call
    }

    let old_text = std::mem::take(&mut state.text);
    prefix.bytes(old_text.as_slice());
    state.text = prefix;

    for sym in state.symbols.symbols.iter_mut() {
        if sym.section == SectionTag::Text {
            sym.value += padded_len;
        }
    }
    if let Some(relocs) = state.relocations.get_mut(&SectionTag::Text) {
        for r in relocs.iter_mut() {
            r.offset += padded_len;
        }
    }

    state
        .symbols
        .merge_global(Symbol::new("__pe_entry", 0, SectionTag::Text, Binding::Global, SymbolKind::Func));
    state.symbols.merge_global(Symbol::new("__ImageBase", image_base, SectionTag::Absolute, Binding::Global, SymbolKind::Notype));

    let entry_idx = match state.symbols.find_global(entry) {
        Some(idx) => idx as u32,
        None => state.symbols.merge_global(Symbol::undefined(entry, Binding::Global)) as u32,
    };
    let exit_idx = match state.symbols.find_global("ExitProcess") {
        Some(idx) => idx as u32,
        None => state.symbols.merge_global(Symbol::undefined("ExitProcess", Binding::Global)) as u32,
    };

    // COFF REL32 carries no explicit addend field; the disp32 bytes are
    // left at zero and `crate::relocation::apply` folds the "relative to
    // the instruction following the field" `+4` into the formula itself.
    state.add_relocation(Relocation::new(call_entry_off, SectionTag::Text, entry_idx, IMAGE_REL_AMD64_REL32 as u32, 0));
    state.add_relocation(Relocation::new(call_exit_off, SectionTag::Text, exit_idx, IMAGE_REL_AMD64_REL32 as u32, 0));

    log::debug!("synthesized `__pe_entry` ({padded_len} bytes) calling `{entry}` then `ExitProcess`");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn shifts_existing_text_symbol_by_padded_stub_length() {
        let mut state = LinkerState::new();
        state.text.bytes(&[0xc3]);
        state
            .symbols
            .merge_global(Symbol::new("main", 0, SectionTag::Text, Binding::Global, SymbolKind::Func));

        synthesize(&mut state, "main", 0x0040_0000).unwrap();

        let main_idx = state.symbols.find_global("main").unwrap();
        assert_eq!(state.symbols.get(main_idx).value, 32);
    }

    #[test]
    fn entry_symbol_sits_at_offset_zero() {
        let mut state = LinkerState::new();
        state
            .symbols
            .merge_global(Symbol::new("main", 0, SectionTag::Text, Binding::Global, SymbolKind::Func));
        synthesize(&mut state, "main", 0x0040_0000).unwrap();
        let idx = state.symbols.find_global("__pe_entry").unwrap();
        assert_eq!(state.symbols.get(idx).value, 0);
    }

    #[test]
    fn image_base_symbol_is_absolute_and_unshifted_by_rebasing() {
        let mut state = LinkerState::new();
        synthesize(&mut state, "main", 0x0040_0000).unwrap();
        let idx = state.symbols.find_global("__ImageBase").unwrap();
        assert_eq!(state.symbols.get(idx).section, SectionTag::Absolute);
        assert_eq!(state.symbols.get(idx).value, 0x0040_0000);
    }

    #[test]
    fn crt_startup_entry_skips_argc_argv_setup() {
        let mut state = LinkerState::new();
        synthesize(&mut state, "mainCRTStartup", 0x0040_0000).unwrap();
        // shorter stub than the `main` variant (no xor ecx/xor edx pair).
        assert!(state.text.len() >= 16);
    }
}
