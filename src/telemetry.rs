//! Tracing subscriber setup helpers.
//!
//! Hosts embedding the engine usually install their own subscriber; these
//! helpers cover binaries and tests that just want sensible defaults.

use tracing_subscriber::{fmt, EnvFilter};

const DEFAULT_FILTER: &str = "canvasflow=info";

/// Install a fmt subscriber honoring `RUST_LOG`, defaulting to
/// `canvasflow=info`. Panics if a global subscriber is already set; use
/// [`try_init`] when that is possible.
pub fn init() {
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER)),
        )
        .init();
}

/// Like [`init`] but tolerant of an existing subscriber.
pub fn try_init() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER)),
        )
        .try_init()
        .map_err(Into::into)
}
