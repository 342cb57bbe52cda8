//! Collaborator traits the core expects the caller to supply (spec.md §6.2):
//! a monotonic clock for TTLs and leases, and a hasher for key-hash style
//! identifiers. A UUID generator is intentionally not modeled here — entity
//! ids are caller-supplied strings (see [`crate::ids`]).

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

/// Supplies "now" for TTL and lease-expiry computations.
///
/// Abstracted so tests can inject a controllable clock instead of sleeping
/// real wall-clock time.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// The current time.
    fn now(&self) -> DateTime<Utc>;
}

/// The default [`Clock`], backed by the system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// SHA-256 over UTF-8 bytes, hex-encoded. Used for `key_hash`-style
/// identifiers (API keys) and for advisory-lock key derivation.
#[must_use]
pub fn sha256_hex(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Truncates a SHA-256 digest of `name` to the first 8 bytes, interpreted
/// as a big-endian `i64`. This is the key-derivation scheme for named
/// advisory locks (spec.md §4.8).
#[must_use]
pub fn advisory_lock_key(name: &str) -> i64 {
    let digest = Sha256::digest(name.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    i64::from_be_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advisory_lock_key_is_deterministic() {
        let a = advisory_lock_key("install:t1:ns1");
        let b = advisory_lock_key("install:t1:ns1");
        assert_eq!(a, b);
    }

    #[test]
    fn advisory_lock_key_differs_by_name() {
        assert_ne!(
            advisory_lock_key("install:t1:ns1"),
            advisory_lock_key("install:t2:ns1")
        );
    }

    #[test]
    fn sha256_hex_is_64_chars() {
        assert_eq!(sha256_hex("abc").len(), 64);
    }

    #[test]
    fn system_clock_advances() {
        let clock = SystemClock;
        let t1 = clock.now();
        let t2 = clock.now();
        assert!(t2 >= t1);
    }
}
