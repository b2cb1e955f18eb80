use env_logger::{Builder, Env};

/// Initialize logging for a binary: `RUST_LOG` controls the filter and
/// everything defaults to `info`.
pub fn init() {
    Builder::from_env(Env::default().default_filter_or("info")).init();
}

/// Logging for tests; safe to call more than once.
pub fn init_for_tests() {
    let _ = Builder::from_env(Env::default().default_filter_or("info"))
        .is_test(true)
        .try_init();
}
