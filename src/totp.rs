//! Stateless TOTP verification.
//!
//! A code is accepted when it matches the HMAC-SHA1 value for the current
//! 30-second step or either adjacent step (`TOTP_SKEW`), tolerating client
//! clock drift. Holds no state and performs no I/O.

use std::time::{SystemTime, UNIX_EPOCH};
use totp_rs::{Algorithm, TOTP};

/// Shared-secret length required for registered TOTP credentials.
pub const TOTP_KEY_LEN: usize = 20;
/// Time-step size in seconds.
pub const TOTP_STEP_SECONDS: u64 = 30;
/// Number of digits in a code.
pub const TOTP_DIGITS: usize = 6;
/// Accepted drift in steps on either side of the current window.
pub const TOTP_SKEW: u8 = 1;

/// Check a candidate code against the key for the current time window.
///
/// Malformed keys and codes are rejected, not raised.
#[must_use]
pub fn verify_totp(key: &[u8], code: &str) -> bool {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_secs())
        .unwrap_or(0);
    verify_totp_at(key, code, now)
}

fn verify_totp_at(key: &[u8], code: &str, unix_seconds: u64) -> bool {
    if key.len() != TOTP_KEY_LEN {
        return false;
    }
    if code.len() != TOTP_DIGITS || !code.bytes().all(|ch| ch.is_ascii_digit()) {
        return false;
    }
    let Ok(totp) = TOTP::new(
        Algorithm::SHA1,
        TOTP_DIGITS,
        TOTP_SKEW,
        TOTP_STEP_SECONDS,
        key.to_vec(),
    ) else {
        return false;
    };
    totp.check(code, unix_seconds)
}

#[cfg(test)]
mod tests {
    use super::{verify_totp_at, TOTP_DIGITS, TOTP_KEY_LEN, TOTP_SKEW, TOTP_STEP_SECONDS};
    use totp_rs::{Algorithm, TOTP};

    fn generator(key: &[u8]) -> TOTP {
        TOTP::new(
            Algorithm::SHA1,
            TOTP_DIGITS,
            TOTP_SKEW,
            TOTP_STEP_SECONDS,
            key.to_vec(),
        )
        .unwrap()
    }

    #[test]
    fn accepts_code_for_current_window() {
        let key = [7u8; TOTP_KEY_LEN];
        let now = 1_700_000_015;
        let code = generator(&key).generate(now);
        assert!(verify_totp_at(&key, &code, now));
    }

    #[test]
    fn accepts_adjacent_window_within_skew() {
        let key = [9u8; TOTP_KEY_LEN];
        let now = 1_700_000_000;
        let previous = generator(&key).generate(now - TOTP_STEP_SECONDS);
        assert!(verify_totp_at(&key, &previous, now));
    }

    #[test]
    fn rejects_code_outside_skew() {
        let key = [9u8; TOTP_KEY_LEN];
        let now = 1_700_000_000;
        let totp = generator(&key);
        let accepted = [
            totp.generate(now - TOTP_STEP_SECONDS),
            totp.generate(now),
            totp.generate(now + TOTP_STEP_SECONDS),
        ];
        // Six-digit codes can collide across windows; only assert on windows
        // whose code differs from every accepted one.
        for offset in [2u64, 3, 10, 100] {
            let stale = totp.generate(now - offset * TOTP_STEP_SECONDS);
            if !accepted.contains(&stale) {
                assert!(!verify_totp_at(&key, &stale, now));
            }
        }
    }

    #[test]
    fn rejects_wrong_key() {
        let key = [1u8; TOTP_KEY_LEN];
        let other = [2u8; TOTP_KEY_LEN];
        let now = 1_700_000_000;
        let code = generator(&key).generate(now);
        assert!(!verify_totp_at(&other, &code, now));
    }

    #[test]
    fn rejects_malformed_inputs() {
        let key = [1u8; TOTP_KEY_LEN];
        assert!(!verify_totp_at(&key, "12345", 1_700_000_000));
        assert!(!verify_totp_at(&key, "12345a", 1_700_000_000));
        assert!(!verify_totp_at(&[1u8; 10], "123456", 1_700_000_000));
    }
}
