//! Verifier and middleware settings.
//!
//! Both structs deserialize with defaults for every field, so a host can
//! embed them in its own TOML or JSON configuration and only override what
//! it needs.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default maximum age of a signature's `created` parameter (5 minutes).
pub const DEFAULT_MAX_AGE_SECS: u64 = 300;

/// Default tolerated clock skew for `created` values in the future.
pub const DEFAULT_MAX_CLOCK_SKEW_SECS: u64 = 30;

/// Default deadline for a single resolver call.
pub const DEFAULT_RESOLVE_TIMEOUT_MS: u64 = 10_000;

/// Default cap on buffered request bodies (10 MiB).
pub const DEFAULT_MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Verifier policy knobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifierConfig {
    /// Reject signatures whose `created` is older than this. `None` disables
    /// the staleness check and leaves it to the caller.
    pub max_age_secs: Option<u64>,
    /// How far in the future `created` may be.
    pub max_clock_skew_secs: u64,
    /// Deadline for each resolver call. `None` waits indefinitely.
    pub resolve_timeout_ms: Option<u64>,
    /// Reject signatures that carry no `nonce` parameter.
    pub require_nonce: bool,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            max_age_secs: Some(DEFAULT_MAX_AGE_SECS),
            max_clock_skew_secs: DEFAULT_MAX_CLOCK_SKEW_SECS,
            resolve_timeout_ms: Some(DEFAULT_RESOLVE_TIMEOUT_MS),
            require_nonce: false,
        }
    }
}

impl VerifierConfig {
    pub fn max_age(&self) -> Option<Duration> {
        self.max_age_secs.map(Duration::from_secs)
    }

    pub fn resolve_timeout(&self) -> Option<Duration> {
        self.resolve_timeout_ms.map(Duration::from_millis)
    }
}

/// Middleware settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Let unsigned requests through without an authenticated DID.
    /// Requests that carry an invalid signature are still rejected.
    pub optional: bool,
    /// Largest body buffered for verification.
    pub max_body_bytes: usize,
    pub verifier: VerifierConfig,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            optional: false,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            verifier: VerifierConfig::default(),
        }
    }
}
