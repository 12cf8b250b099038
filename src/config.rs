//! Authentication configuration loaded at startup.

use anyhow::{anyhow, Result};
use url::Url;

const DEFAULT_SESSION_TTL_SECONDS: i64 = 30 * 24 * 60 * 60;
const DEFAULT_RESET_SESSION_TTL_SECONDS: i64 = 10 * 60;
const ENV_RP_ORIGIN: &str = "CUSTODE_RP_ORIGIN";
const ENV_SESSION_TTL_SECONDS: &str = "CUSTODE_SESSION_TTL_SECONDS";
const ENV_SESSION_COOKIE_SECURE: &str = "CUSTODE_SESSION_COOKIE_SECURE";

/// Configuration for session lifetimes and the WebAuthn relying party.
///
/// The relying-party id is derived from the origin host; assertions are
/// checked against both the id hash and the exact origin string.
#[derive(Clone, Debug)]
pub struct AuthConfig {
    relying_party_id: String,
    expected_origin: String,
    session_ttl_seconds: i64,
    reset_session_ttl_seconds: i64,
    session_cookie_secure: bool,
}

impl AuthConfig {
    /// Create a configuration for the given web origin, e.g.
    /// `https://accounts.example.com`.
    ///
    /// # Errors
    /// Returns an error if the origin is not a valid URL with a host.
    pub fn new(origin: &str) -> Result<Self> {
        let expected_origin = normalize_origin(origin)?;
        let parsed = Url::parse(&expected_origin)?;
        let relying_party_id = parsed
            .host_str()
            .ok_or_else(|| anyhow!("origin must include a host: {origin}"))?
            .to_string();

        Ok(Self {
            relying_party_id,
            expected_origin,
            session_ttl_seconds: DEFAULT_SESSION_TTL_SECONDS,
            reset_session_ttl_seconds: DEFAULT_RESET_SESSION_TTL_SECONDS,
            session_cookie_secure: origin.starts_with("https://"),
        })
    }

    /// Load configuration from `CUSTODE_*` environment variables.
    ///
    /// # Errors
    /// Returns an error if the configured origin is invalid.
    pub fn from_env() -> Result<Self> {
        let origin = std::env::var(ENV_RP_ORIGIN).unwrap_or_else(|_| "http://localhost:4321".to_string());
        let mut config = Self::new(&origin)?;
        if let Some(ttl) = parse_i64_env(ENV_SESSION_TTL_SECONDS) {
            config = config.with_session_ttl_seconds(ttl);
        }
        if let Some(secure) = parse_bool_env(ENV_SESSION_COOKIE_SECURE) {
            config.session_cookie_secure = secure;
        }
        Ok(config)
    }

    #[must_use]
    pub fn with_session_ttl_seconds(mut self, seconds: i64) -> Self {
        self.session_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_reset_session_ttl_seconds(mut self, seconds: i64) -> Self {
        self.reset_session_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn relying_party_id(&self) -> &str {
        &self.relying_party_id
    }

    #[must_use]
    pub fn expected_origin(&self) -> &str {
        &self.expected_origin
    }

    #[must_use]
    pub fn session_ttl_seconds(&self) -> i64 {
        self.session_ttl_seconds
    }

    #[must_use]
    pub fn reset_session_ttl_seconds(&self) -> i64 {
        self.reset_session_ttl_seconds
    }

    #[must_use]
    pub fn session_cookie_secure(&self) -> bool {
        self.session_cookie_secure
    }
}

/// Normalize an origin to `scheme://host[:port]` so comparisons are exact.
fn normalize_origin(origin: &str) -> Result<String> {
    let parsed = Url::parse(origin).map_err(|_| anyhow!("invalid origin URL: {origin}"))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| anyhow!("origin must include a host: {origin}"))?;
    let port = parsed
        .port()
        .map_or_else(String::new, |port| format!(":{port}"));
    Ok(format!("{}://{}{}", parsed.scheme(), host, port))
}

fn parse_i64_env(key: &str) -> Option<i64> {
    std::env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<i64>().ok())
        .filter(|value| *value > 0)
}

fn parse_bool_env(key: &str) -> Option<bool> {
    std::env::var(key)
        .ok()
        .and_then(|value| match value.trim() {
            "1" | "true" | "TRUE" | "yes" | "YES" => Some(true),
            "0" | "false" | "FALSE" | "no" | "NO" => Some(false),
            _ => None,
        })
}
