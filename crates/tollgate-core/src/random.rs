//! CSRNG helpers and timing-attack countermeasures.

use std::time::{Duration, Instant};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use subtle::ConstantTimeEq;

/// Default entropy for opaque tokens: 32 bytes (256 bits).
pub const DEFAULT_TOKEN_BYTES: usize = 32;

/// Rejection-sampling ceiling for digit generation. Bytes at or above this
/// value are discarded so `byte % 10` stays uniform over 0..=9.
const DIGIT_REJECT_ABOVE: u8 = 250;

/// Fill a buffer of `n` bytes from the OS CSRNG.
///
/// # Panics
///
/// Panics when `n == 0`; asking for an empty token is a programmer error.
pub fn secure_bytes(n: usize) -> Vec<u8> {
    assert!(n > 0, "token length must be positive");
    let mut buf = vec![0u8; n];
    OsRng.fill_bytes(&mut buf);
    buf
}

/// An opaque token: `n` CSRNG bytes, base64url without padding.
pub fn secure_token(n: usize) -> String {
    URL_SAFE_NO_PAD.encode(secure_bytes(n))
}

/// A default-strength (256-bit) opaque token.
pub fn default_token() -> String {
    secure_token(DEFAULT_TOKEN_BYTES)
}

/// `len` uniformly distributed decimal digits.
///
/// Uses rejection sampling: bytes >= 250 are discarded and the buffer is
/// refilled until enough accepted bytes exist, so every digit is exactly
/// equiprobable.
pub fn random_digits(len: usize) -> String {
    assert!(len > 0, "digit count must be positive");
    let mut out = String::with_capacity(len);
    let mut buf = [0u8; 64];
    while out.len() < len {
        OsRng.fill_bytes(&mut buf);
        for byte in buf {
            if byte < DIGIT_REJECT_ABOVE {
                out.push(char::from(b'0' + byte % 10));
                if out.len() == len {
                    break;
                }
            }
        }
    }
    out
}

/// Constant-time equality over the UTF-8 encodings of two strings.
///
/// Length mismatches return false but still run a full comparison so the
/// fast-fail path is not observably faster.
pub fn timing_safe_eq(a: &str, b: &str) -> bool {
    let a = a.as_bytes();
    let b = b.as_bytes();
    if a.len() != b.len() {
        // Burn comparable work before failing.
        let _ = a.ct_eq(a);
        return false;
    }
    a.ct_eq(b).into()
}

/// Run `fut` and pad its total duration to at least `min` plus a random
/// jitter of up to `jitter_ms` milliseconds.
///
/// Sensitive comparisons (PKCE, emailed codes) run through this wrapper so
/// failure branches cannot be distinguished by latency.
pub async fn with_min_duration<F, T>(min: Duration, jitter_ms: u64, fut: F) -> T
where
    F: std::future::Future<Output = T>,
{
    let started = Instant::now();
    let out = fut.await;
    let jitter = if jitter_ms == 0 {
        0
    } else {
        u64::from(OsRng.next_u32()) % (jitter_ms + 1)
    };
    let target = min + Duration::from_millis(jitter);
    if let Some(remaining) = target.checked_sub(started.elapsed()) {
        tokio::time::sleep(remaining).await;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secure_token_is_base64url() {
        let token = secure_token(32);
        // 32 bytes -> 43 base64url chars, no padding.
        assert_eq!(token.len(), 43);
        assert!(!token.contains('='));
        assert!(!token.contains('+'));
        assert!(!token.contains('/'));
    }

    #[test]
    fn test_tokens_are_unique() {
        assert_ne!(default_token(), default_token());
    }

    #[test]
    fn test_random_digits_shape() {
        let digits = random_digits(6);
        assert_eq!(digits.len(), 6);
        assert!(digits.chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn test_random_digits_cover_range() {
        // 512 draws of 8 digits make a missing digit astronomically unlikely.
        let mut seen = [false; 10];
        for _ in 0..512 {
            for c in random_digits(8).chars() {
                seen[(c as u8 - b'0') as usize] = true;
            }
        }
        assert!(seen.iter().all(|&s| s));
    }

    #[test]
    fn test_timing_safe_eq() {
        assert!(timing_safe_eq("123456", "123456"));
        assert!(!timing_safe_eq("123456", "123457"));
        assert!(!timing_safe_eq("123456", "12345"));
        assert!(!timing_safe_eq("", "x"));
        assert!(timing_safe_eq("", ""));
    }

    #[tokio::test]
    async fn test_min_duration_floor() {
        let started = Instant::now();
        let value = with_min_duration(Duration::from_millis(50), 20, async { 7 }).await;
        assert_eq!(value, 7);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(50), "finished in {elapsed:?}");
        assert!(elapsed < Duration::from_millis(90), "took {elapsed:?}");
    }

    #[tokio::test]
    async fn test_min_duration_does_not_delay_slow_work() {
        let started = Instant::now();
        with_min_duration(Duration::from_millis(10), 0, async {
            tokio::time::sleep(Duration::from_millis(30)).await;
        })
        .await;
        assert!(started.elapsed() < Duration::from_millis(60));
    }
}
