//! Error taxonomy shared by the middle-end, object writer and linkers.
//!
//! Each phase either completes or aborts; nothing here is recovered
//! mid-pipeline (see the error-handling design in the toolchain notes).

use thiserror::Error;

/// The main error type for the compiler core and linkers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("malformed object file: {message}")]
    MalformedObject { message: String },

    #[error("duplicate strong symbol `{name}`")]
    DuplicateSymbol { name: String },

    #[error("undefined symbol `{name}`")]
    UndefinedSymbol { name: String },

    #[error("relocation overflow at offset {offset:#x} in section {section}: {message}")]
    RelocationOverflow {
        offset: u64,
        section: String,
        message: String,
    },

    #[error("unsupported relocation type {reloc_type} for target {target}")]
    UnsupportedRelocation { reloc_type: u32, target: String },

    #[error("I/O error: {message}")]
    Io { message: String },

    #[error("SSA invariant violated: {message}")]
    SsaInvariant { message: String },

    #[error("verifier error: {message}")]
    Verifier { message: String },
}

/// Result type alias used throughout the compiler core and linkers.
pub type CoreResult<T> = Result<T, CoreError>;

impl CoreError {
    pub fn malformed_object(message: impl Into<String>) -> Self {
        Self::MalformedObject {
            message: message.into(),
        }
    }

    pub fn duplicate_symbol(name: impl Into<String>) -> Self {
        Self::DuplicateSymbol { name: name.into() }
    }

    pub fn undefined_symbol(name: impl Into<String>) -> Self {
        Self::UndefinedSymbol { name: name.into() }
    }

    pub fn relocation_overflow(
        offset: u64,
        section: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::RelocationOverflow {
            offset,
            section: section.into(),
            message: message.into(),
        }
    }

    pub fn unsupported_relocation(reloc_type: u32, target: impl Into<String>) -> Self {
        Self::UnsupportedRelocation {
            reloc_type,
            target: target.into(),
        }
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::Io {
            message: message.into(),
        }
    }

    pub fn ssa_invariant(message: impl Into<String>) -> Self {
        Self::SsaInvariant {
            message: message.into(),
        }
    }

    pub fn verifier(message: impl Into<String>) -> Self {
        Self::Verifier {
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for CoreError {
    fn from(e: std::io::Error) -> Self {
        Self::Io {
            message: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_context() {
        let e = CoreError::undefined_symbol("main");
        assert_eq!(e.to_string(), "undefined symbol `main`");
    }

    #[test]
    fn relocation_overflow_formats_offset_in_hex() {
        let e = CoreError::relocation_overflow(0x10, ".text", "PC32 out of range");
        assert!(e.to_string().contains("0x10"));
    }
}
