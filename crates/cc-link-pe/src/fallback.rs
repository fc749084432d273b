//! Built-in function-to-DLL fallback table: lets the linker produce a
//! working import table for common Windows/UCRT entry points even when
//! no `.lib` input supplies them — the cross-compilation case spec.md
//! §4.9 Phase 4 calls out explicitly.

/// Returns the DLL this well-known symbol resolves against, or `None`
/// if `name` isn't in the built-in table (the caller then has nothing
/// left to try and the symbol is genuinely undefined).
pub fn lookup(name: &str) -> Option<&'static str> {
    for (sym, dll) in TABLE {
        if *sym == name {
            return Some(dll);
        }
    }
    None
}

const TABLE: &[(&str, &str)] = &[
    // kernel32
    ("ExitProcess", "kernel32.dll"),
    ("GetStdHandle", "kernel32.dll"),
    ("WriteFile", "kernel32.dll"),
    ("ReadFile", "kernel32.dll"),
    ("GetLastError", "kernel32.dll"),
    ("HeapAlloc", "kernel32.dll"),
    ("HeapFree", "kernel32.dll"),
    ("GetProcessHeap", "kernel32.dll"),
    ("GetCommandLineA", "kernel32.dll"),
    ("GetModuleHandleA", "kernel32.dll"),
    ("LoadLibraryA", "kernel32.dll"),
    ("GetProcAddress", "kernel32.dll"),
    // ucrtbase (VC++ universal CRT)
    ("printf", "ucrtbase.dll"),
    ("fprintf", "ucrtbase.dll"),
    ("sprintf", "ucrtbase.dll"),
    ("snprintf", "ucrtbase.dll"),
    ("puts", "ucrtbase.dll"),
    ("putchar", "ucrtbase.dll"),
    ("malloc", "ucrtbase.dll"),
    ("calloc", "ucrtbase.dll"),
    ("realloc", "ucrtbase.dll"),
    ("free", "ucrtbase.dll"),
    ("exit", "ucrtbase.dll"),
    ("abort", "ucrtbase.dll"),
    ("memcpy", "ucrtbase.dll"),
    ("memset", "ucrtbase.dll"),
    ("memmove", "ucrtbase.dll"),
    ("strlen", "ucrtbase.dll"),
    ("strcmp", "ucrtbase.dll"),
    ("strcpy", "ucrtbase.dll"),
    ("strcat", "ucrtbase.dll"),
    ("fopen", "ucrtbase.dll"),
    ("fclose", "ucrtbase.dll"),
    ("fread", "ucrtbase.dll"),
    ("fwrite", "ucrtbase.dll"),
    ("__acrt_iob_func", "ucrtbase.dll"),
];
