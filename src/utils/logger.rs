use env_logger::{Builder, Env};

/// Initialise `env_logger` with an `info` default; `RUST_LOG` overrides it.
/// Safe to call more than once.
pub fn setup_logger() {
    let _ = Builder::from_env(Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .try_init();
}
