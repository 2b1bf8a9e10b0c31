//! Identifier generation for runs, sessions, and HITL requests.

use rand::distr::{Alphanumeric, SampleString};

/// A short prefixed id, e.g. `hitl-x4G9kQ2p`.
#[must_use]
pub fn short_id(prefix: &str) -> String {
    let suffix = Alphanumeric.sample_string(&mut rand::rng(), 8);
    format!("{prefix}-{suffix}")
}

/// A fresh session identifier.
#[must_use]
pub fn session_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
