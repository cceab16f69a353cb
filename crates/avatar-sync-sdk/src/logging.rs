//! Tracing subscriber setup
//!
//! Hosts that install their own subscriber skip this.

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "avatar_sync_sdk=info";
const DEBUG_FILTER: &str = "avatar_sync_sdk=debug";

/// Installs a fmt subscriber honoring `RUST_LOG`; no-op when one is already set.
pub fn init_tracing(debug_mode: bool) {
    let fallback = if debug_mode { DEBUG_FILTER } else { DEFAULT_FILTER };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
