//! WebAuthn challenge consumption.
//!
//! Challenge issuance lives outside this core; verification only needs the
//! ability to check that a challenge was issued, is still within its TTL, and
//! has not been consumed. Consumption is single-use: two assertions carrying
//! the same challenge cannot both verify.

use anyhow::{Context, Result};
use rand::{rngs::OsRng, RngCore};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

const DEFAULT_CHALLENGE_TTL_SECONDS: u64 = 300;
const CHALLENGE_LEN: usize = 32;

/// Capability consumed by the assertion verifier.
pub trait ChallengeConsumer: Send + Sync {
    /// Consume `challenge` if it was issued and is still valid.
    fn verify_and_consume(&self, challenge: &[u8]) -> bool;
}

struct IssuedChallenge {
    created_at: Instant,
}

/// Process-local challenge store with a TTL and single-use consumption.
pub struct InMemoryChallengeStore {
    ttl: Duration,
    issued: Mutex<HashMap<Vec<u8>, IssuedChallenge>>,
}

impl InMemoryChallengeStore {
    #[must_use]
    pub fn new() -> Self {
        Self::with_ttl(Duration::from_secs(DEFAULT_CHALLENGE_TTL_SECONDS))
    }

    #[must_use]
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl,
            issued: Mutex::new(HashMap::new()),
        }
    }

    /// Issue a fresh random challenge.
    ///
    /// # Errors
    /// Returns an error if the system RNG fails.
    pub fn issue(&self) -> Result<Vec<u8>> {
        let mut bytes = vec![0u8; CHALLENGE_LEN];
        OsRng
            .try_fill_bytes(&mut bytes)
            .context("failed to generate challenge")?;
        if let Ok(mut issued) = self.issued.lock() {
            prune(&mut issued, self.ttl);
            issued.insert(
                bytes.clone(),
                IssuedChallenge {
                    created_at: Instant::now(),
                },
            );
        }
        Ok(bytes)
    }
}

impl Default for InMemoryChallengeStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ChallengeConsumer for InMemoryChallengeStore {
    fn verify_and_consume(&self, challenge: &[u8]) -> bool {
        let Ok(mut issued) = self.issued.lock() else {
            return false;
        };
        prune(&mut issued, self.ttl);
        match issued.remove(challenge) {
            Some(entry) => entry.created_at.elapsed() < self.ttl,
            None => false,
        }
    }
}

fn prune(issued: &mut HashMap<Vec<u8>, IssuedChallenge>, ttl: Duration) {
    issued.retain(|_, entry| entry.created_at.elapsed() < ttl);
}

#[cfg(test)]
mod tests {
    use super::{ChallengeConsumer, InMemoryChallengeStore};
    use std::time::Duration;

    #[test]
    fn issued_challenge_is_single_use() {
        let store = InMemoryChallengeStore::new();
        let challenge = store.issue().unwrap();
        assert!(store.verify_and_consume(&challenge));
        assert!(!store.verify_and_consume(&challenge));
    }

    #[test]
    fn unissued_challenge_is_rejected() {
        let store = InMemoryChallengeStore::new();
        assert!(!store.verify_and_consume(b"never-issued"));
    }

    #[test]
    fn expired_challenge_is_rejected() {
        let store = InMemoryChallengeStore::with_ttl(Duration::ZERO);
        let challenge = store.issue().unwrap();
        assert!(!store.verify_and_consume(&challenge));
    }

    #[test]
    fn challenges_are_distinct() {
        let store = InMemoryChallengeStore::new();
        assert_ne!(store.issue().unwrap(), store.issue().unwrap());
    }
}
