//! PKCE (RFC 7636) generation and timing-normalized validation.

use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::random::{secure_bytes, timing_safe_eq, with_min_duration};
use crate::{AuthError, Result};

/// Minimum verifier entropy in raw bytes (43 base64url chars).
pub const MIN_VERIFIER_BYTES: usize = 32;
/// Maximum verifier entropy in raw bytes (128 base64url chars).
pub const MAX_VERIFIER_BYTES: usize = 96;

/// Every validation call takes at least this long.
const VALIDATE_FLOOR: Duration = Duration::from_millis(50);
/// Random extra delay added on top of the floor.
const VALIDATE_JITTER_MS: u64 = 20;

/// A generated verifier/challenge pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pkce {
    /// The secret the client presents at `/token`
    pub verifier: String,
    /// base64url(SHA-256(verifier)), sent with `/authorize`
    pub challenge: String,
    /// Challenge method; only `S256` is supported
    pub method: String,
}

/// Generate a PKCE pair from `bytes` of CSRNG entropy (default 64).
///
/// # Errors
///
/// Returns [`AuthError::Crypto`] when `bytes` falls outside the RFC 7636
/// range of 32..=96 raw bytes.
pub fn generate(bytes: usize) -> Result<Pkce> {
    if !(MIN_VERIFIER_BYTES..=MAX_VERIFIER_BYTES).contains(&bytes) {
        return Err(AuthError::Crypto(format!(
            "pkce verifier entropy must be {MIN_VERIFIER_BYTES}..={MAX_VERIFIER_BYTES} bytes, got {bytes}"
        )));
    }
    let verifier = URL_SAFE_NO_PAD.encode(secure_bytes(bytes));
    let challenge = challenge_of(&verifier);
    Ok(Pkce {
        verifier,
        challenge,
        method: "S256".to_string(),
    })
}

/// Generate a PKCE pair with the default 64 bytes of entropy.
pub fn generate_default() -> Pkce {
    generate(64).unwrap_or_else(|_| unreachable!("64 is within the verifier range"))
}

/// base64url(SHA-256(verifier)).
pub fn challenge_of(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

fn verifier_charset_ok(verifier: &str) -> bool {
    verifier
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'_' | b'~'))
}

/// Validate a submitted verifier against a stored challenge.
///
/// The entire path - including every failure branch - runs through the
/// minimum-duration wrapper and performs a hash plus constant-time compare,
/// so a missing or malformed verifier is not observably faster than a
/// wrong one.
pub async fn validate(verifier: &str, challenge: &str, method: &str) -> bool {
    with_min_duration(VALIDATE_FLOOR, VALIDATE_JITTER_MS, async {
        let well_formed = method == "S256"
            && (43..=128).contains(&verifier.len())
            && verifier_charset_ok(verifier)
            && !challenge.is_empty();

        let computed = challenge_of(verifier);
        let matched = timing_safe_eq(&computed, challenge);
        well_formed && matched
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn test_generated_pair_validates() {
        let pkce = generate_default();
        assert!((43..=128).contains(&pkce.verifier.len()));
        assert!(validate(&pkce.verifier, &pkce.challenge, "S256").await);
    }

    #[tokio::test]
    async fn test_wrong_verifier_rejected() {
        let pkce = generate_default();
        let other = generate_default();
        assert!(!validate(&other.verifier, &pkce.challenge, "S256").await);
    }

    #[tokio::test]
    async fn test_plain_method_rejected() {
        let pkce = generate_default();
        assert!(!validate(&pkce.verifier, &pkce.verifier, "plain").await);
    }

    #[tokio::test]
    async fn test_malformed_inputs_rejected_within_timing_band() {
        for (verifier, challenge) in [
            ("", ""),
            ("short", "challenge"),
            ("has spaces which are not allowed in a verifier 1234", "x"),
        ] {
            let started = Instant::now();
            assert!(!validate(verifier, challenge, "S256").await);
            let elapsed = started.elapsed();
            assert!(elapsed >= Duration::from_millis(50), "{elapsed:?}");
            assert!(elapsed < Duration::from_millis(90), "{elapsed:?}");
        }
    }

    #[test]
    fn test_entropy_bounds() {
        assert!(generate(31).is_err());
        assert!(generate(32).is_ok());
        assert!(generate(96).is_ok());
        assert!(generate(97).is_err());
    }
}
