//! Capped exponential backoff with deterministic per-host jitter.
//!
//! - Interval: `15s * 4^failures`, capped at one hour (15s, 60s, 240s, 960s, 3600s, ...)
//! - Jitter only shortens a wait, by up to a fifth, so the cap always holds
//! - Jitter is derived from the host identity and the attempt number: two
//!   hosts retrying after the same control-plane outage spread out, while a
//!   given host's schedule stays reproducible

use std::time::Duration;

use sha2::{Digest, Sha256};

/// First retry wait, in seconds.
pub const BASE_SECS: u64 = 15;
/// Longest wait between retries, in seconds.
pub const CAP_SECS: u64 = 3600;
/// Jitter removes at most `1 / JITTER_DIVISOR` of the interval.
const JITTER_DIVISOR: u64 = 5;

/// Un-jittered wait after `failures` consecutive failures.
#[must_use]
pub fn next_interval(failures: u32) -> Duration {
    let factor = 4u64.checked_pow(failures).unwrap_or(u64::MAX);
    Duration::from_secs(BASE_SECS.saturating_mul(factor).min(CAP_SECS))
}

/// Retry schedule for one host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    seed: u64,
}

impl Backoff {
    /// Schedule seeded from a stable host identifier (machine id, host UUID).
    #[must_use]
    pub fn for_host(host_id: &str) -> Self {
        let digest = Sha256::digest(host_id.as_bytes());
        let mut seed = [0u8; 8];
        seed.copy_from_slice(&digest[..8]);
        Self {
            seed: u64::from_le_bytes(seed),
        }
    }

    /// Schedule with no jitter.
    #[must_use]
    pub fn unjittered() -> Self {
        Self { seed: 0 }
    }

    /// Jittered wait after `failures` consecutive failures.
    #[must_use]
    pub fn delay(&self, failures: u32) -> Duration {
        let base = next_interval(failures);
        if self.seed == 0 {
            return base;
        }
        let base_ms = u64::try_from(base.as_millis()).unwrap_or(u64::MAX);
        let span = base_ms / JITTER_DIVISOR;
        if span == 0 {
            return base;
        }
        let cut = mix(self.seed ^ u64::from(failures)) % (span + 1);
        Duration::from_millis(base_ms - cut)
    }
}

/// splitmix64 finalizer.
fn mix(mut z: u64) -> u64 {
    z = z.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}
