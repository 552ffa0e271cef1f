// Thin wrapper so every binary in this workspace sets up `tracing` the same
// way instead of copy-pasting an `EnvFilter` incantation.

use tracing_subscriber::EnvFilter;

/// Install a `tracing` subscriber that honours `RUST_LOG`, defaulting to
/// `info` for this crate family when the variable is unset.
pub fn init_default(default_directive: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
