//! Shared infrastructure used across every compiler-core and linker crate:
//! - Error types and a common `Result` alias
//! - A little-endian growable byte buffer used by the object writer and both linkers
//! - Logging initialization shared by all fixture binaries and tests

pub mod bitset;
pub mod buffer;
pub mod error;
pub mod logging;

pub use bitset::Bitset;
pub use buffer::{align_up, Buffer};
pub use error::{CoreError, CoreResult};
pub use logging::init_logging;
