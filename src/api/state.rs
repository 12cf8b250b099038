//! Shared state handed to every handler.

use std::sync::Arc;

use crate::challenge::InMemoryChallengeStore;
use crate::config::AuthConfig;
use crate::rate_limit::RateLimiter;

/// Configuration, rate limiter, and challenge store behind one `Arc`.
pub struct AuthState {
    config: AuthConfig,
    rate_limiter: Arc<dyn RateLimiter>,
    challenges: InMemoryChallengeStore,
}

impl AuthState {
    #[must_use]
    pub fn new(config: AuthConfig, rate_limiter: Arc<dyn RateLimiter>) -> Self {
        Self {
            config,
            rate_limiter,
            challenges: InMemoryChallengeStore::new(),
        }
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    #[must_use]
    pub fn rate_limiter(&self) -> &dyn RateLimiter {
        self.rate_limiter.as_ref()
    }

    #[must_use]
    pub fn challenges(&self) -> &InMemoryChallengeStore {
        &self.challenges
    }
}
