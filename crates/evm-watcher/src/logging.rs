//! Tracing setup for binaries and tests.

use tracing_subscriber::EnvFilter;

/// Environment variable checked before `RUST_LOG`.
pub const LOG_LEVEL_ENV: &str = "WATCHER_LOG_LEVEL";

/// Install a fmt subscriber filtered by `WATCHER_LOG_LEVEL`, then `RUST_LOG`, then `info`.
/// Does nothing if a global subscriber is already set.
pub fn init_tracing() {
    let filter = std::env::var(LOG_LEVEL_ENV)
        .ok()
        .and_then(|level| EnvFilter::try_new(level).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
