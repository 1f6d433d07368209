//! Subscriber setup for embedders.

use tracing_subscriber::EnvFilter;

/// Default filter when `RUST_LOG` is unset: library events at info, audit
/// events (authorization denials) included.
pub const DEFAULT_LOG_FILTER: &str = "spacedesk=info,spacedesk_api=info,spacedesk_core=info";

/// Install a global `fmt` subscriber for embedders that have none.
///
/// Returns `false` when a subscriber was already installed.
pub fn init_tracing(default_filter: &str) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).try_init().is_ok()
}
