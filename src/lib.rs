//! # Custode (Account Authentication & Multi-Factor Security Core)
//!
//! `custode` is the authentication core behind an account service: sessions,
//! passwords, and the full second-factor lifecycle (TOTP, passkeys, security
//! keys, recovery codes).
//!
//! ## Sessions
//!
//! Bearer tokens are 32 random bytes; only their SHA-256 hash is stored. A
//! session carries a one-way `two_factor_verified` flag: it is set at creation
//! for assertion logins, promoted by a standalone TOTP step, and only ever
//! demoted in bulk when a recovery code is consumed. Sessions past half their
//! lifetime are refreshed on use.
//!
//! ## Second factors
//!
//! - **TOTP:** at most one credential per user, replaced atomically
//!   (delete-then-insert); replacing it revokes every other session and
//!   confirms the acting one.
//! - **Passkeys / security keys:** stored under the authenticator-issued
//!   credential id; assertions are verified manually (ES256 and RS256) over
//!   `authData || SHA-256(clientDataJSON)`, and a successful assertion is
//!   two-factor-equivalent on its own.
//! - **Recovery codes:** one rotating code per user, redeemed by an atomic
//!   compare-and-rotate so concurrent redemptions cannot both succeed;
//!   redemption strips all credentials and demotes every session.
//!
//! ## Password cascades
//!
//! An authenticated password change keeps the acting session and deletes the
//! rest. An email-verified reset completes only if the account email still
//! matches the one the reset was opened against, then deletes every session.
//! Both cascades are single transactions.
//!
//! The `registered_totp` / `registered_passkey` / `registered_security_key`
//! flags are recomputed from the credential tables on every read, never
//! persisted.

pub mod account;
pub mod api;
pub mod challenge;
pub mod config;
pub mod error;
pub mod password;
pub mod rate_limit;
pub mod store;
pub mod token;
pub mod totp;
pub mod webauthn;
