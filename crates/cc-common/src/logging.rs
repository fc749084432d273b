//! Shared `log`/`env_logger` bootstrap so every binary and fixture runner in
//! the workspace configures logging the same way.

use std::sync::Once;

static INIT: Once = Once::new();

/// Initializes the process-wide logger exactly once. Safe to call from
/// multiple crates and multiple tests in the same process.
pub fn init_logging() {
    INIT.call_once(|| {
        let _ = env_logger::builder().is_test(cfg!(test)).try_init();
    });
}
