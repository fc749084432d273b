//! Phase 2 — `_start` entry stub synthesis. Everything already merged
//! into `.text` belongs to the input objects; this prepends a fixed
//! trampoline that the kernel actually jumps to, shifting every
//! existing `.text` symbol value and relocation offset by the stub's
//! padded length so layout and relocation application never need to
//! know a stub exists.

use cc_common::{align_up, Buffer, CoreResult};
use cc_link::{Binding, LinkerState, Relocation, SectionTag, Symbol, SymbolKind};
use cc_objwriter::elf;

const SECTION_ALIGN: u64 = 16;

/// `_start`:
/// ```text
/// xor ebp, ebp
/// mov rdi, [rsp]         ; argc
/// lea rsi, [rsp+8]       ; argv
/// call main              ; disp32 patched during relocation application
/// mov edi, eax           ; main's return value is the exit code
/// mov eax, 60            ; SYS_exit
/// syscall
/// ```
fn build_stub() -> Vec<u8> {
    vec![
        0x31, 0xed, // xor ebp, ebp
        0x48, 0x8b, 0x3c, 0x24, // mov rdi, [rsp]
        0x48, 0x8d, 0x74, 0x24, 0x08, // lea rsi, [rsp+8]
        0xe8, 0x00, 0x00, 0x00, 0x00, // call main
        0x89, 0xc7, // mov edi, eax
        0xb8, 0x3c, 0x00, 0x00, 0x00, // mov eax, 60
        0x0f, 0x05, // syscall
    ]
}

/// Offset of the `call`'s disp32 field within [`build_stub`]'s bytes.
const CALL_DISP_OFFSET: u64 = 11;

/// Prepends the `_start` stub to `state.text`, shifts every symbol and
/// relocation already anchored in `.text`, adds `_start` as a global
/// text symbol at offset 0, and records a relocation against `entry`
/// for the stub's `call` instruction so Phase 7 patches it like any
/// other `PC32`-shaped reference.
pub fn synthesize(state: &mut LinkerState, entry: &str) -> CoreResult<()> {
    let stub = build_stub();
    let padded_len = align_up(stub.len() as u64, SECTION_ALIGN);

    let mut prefix = Buffer::new();
    prefix.bytes(&stub);
    while (prefix.len() as u64) < padded_len {
        prefix.u8(0x90); // nop filler, unreachable past the syscall
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
        .merge_global(Symbol::new("_start", 0, SectionTag::Text, Binding::Global, SymbolKind::Func));

    let entry_idx = match state.symbols.find_global(entry) {
        Some(idx) => idx as u32,
        None => state.symbols.merge_global(Symbol::undefined(entry, Binding::Global)) as u32,
    };
    // S + A - P, with A = -4, resolves to S - (P + 4): the displacement
    // relative to the instruction following the disp32 field.
    state.add_relocation(Relocation::new(
        CALL_DISP_OFFSET,
        SectionTag::Text,
        entry_idx,
        elf::R_X86_64_PLT32,
        -4,
    ));

    log::debug!("synthesized `_start` ({padded_len} bytes), entry symbol `{entry}`");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn shifts_existing_text_symbol_by_padded_stub_length() {
        let mut state = LinkerState::new();
        state.text.bytes(&[0xc3]); // a pre-existing `ret`
        state
            .symbols
            .merge_global(Symbol::new("main", 0, SectionTag::Text, Binding::Global, SymbolKind::Func));

        synthesize(&mut state, "main").unwrap();

        let main_idx = state.symbols.find_global("main").unwrap();
        assert_eq!(state.symbols.get(main_idx).value, 32);
        assert_eq!(state.text.len(), 32 + 1);
    }

    #[test]
    fn start_symbol_sits_at_offset_zero() {
        let mut state = LinkerState::new();
        state
            .symbols
            .merge_global(Symbol::new("main", 0, SectionTag::Text, Binding::Global, SymbolKind::Func));

        synthesize(&mut state, "main").unwrap();

        let idx = state.symbols.find_global("_start").unwrap();
        assert_eq!(state.symbols.get(idx).value, 0);
    }

    #[test]
    fn undefined_entry_gets_a_placeholder_symbol_and_a_relocation() {
        let mut state = LinkerState::new();
        synthesize(&mut state, "main").unwrap();

        assert!(state.symbols.find_global("main").is_some());
        let relocs = &state.relocations[&SectionTag::Text];
        assert_eq!(relocs.len(), 1);
        assert_eq!(relocs[0].offset, CALL_DISP_OFFSET);
        assert_eq!(relocs[0].addend, -4);
    }
}
