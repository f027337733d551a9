//! Binary-entry-point logging init (SPEC_FULL.md §10.1). Library crates
//! never call this; only a `main` wires it up, the way
//! `neuron-runtime/examples/full_production.rs` installs a subscriber once
//! at process start.

use tracing_subscriber::EnvFilter;

/// Installs a global `tracing_subscriber` honoring `RUST_LOG`, defaulting
/// to `info` when unset. Panics if a subscriber is already installed;
/// callers should invoke this exactly once, at process start.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
