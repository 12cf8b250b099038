//! Account orchestration: login, second-factor lifecycle, and the password
//! and recovery cascades.
//!
//! Handlers call into this module with an already-resolved session and user;
//! every rule about gating, rate limiting, and cascade ordering lives here,
//! never in the HTTP layer.

use sqlx::PgPool;
use tracing::info;

use crate::challenge::ChallengeConsumer;
use crate::config::AuthConfig;
use crate::error::{Denial, Error, Result};
use crate::password::{hash_password, verify_password};
use crate::rate_limit::{RateLimitAction, RateLimitDecision, RateLimiter};
use crate::store::credentials::{
    add_or_replace_totp, add_passkey, add_security_key, delete_passkey, delete_security_key,
    delete_totp, get_totp_key, WebAuthnCredentialRecord,
};
use crate::store::reset::{
    create_reset_session, invalidate_reset_session, mark_reset_two_factor_verified,
    two_factor_gate, ResetSessionRecord, TwoFactorGate,
};
use crate::store::sessions::{
    create_session, invalidate_session, mark_two_factor_verified, SessionFlags, SessionRecord,
};
use crate::store::users::{
    consume_recovery_code, get_password_hash, get_recovery_code, get_user_by_email,
    rotate_recovery_code, update_password, update_password_with_email, UserRecord,
};
use crate::totp::{verify_totp, TOTP_KEY_LEN};
use crate::webauthn::{verify_assertion, AssertionRequest, CoseAlgorithm, CredentialKind};

const MIN_PASSWORD_LEN: usize = 8;
const MAX_PASSWORD_LEN: usize = 255;

/// A freshly established session: the raw bearer token and its owner.
#[derive(Clone, Debug)]
pub struct EstablishedSession {
    pub token: String,
    pub user_id: i64,
}

fn enforce_rate_limit(
    limiter: &dyn RateLimiter,
    user_id: i64,
    action: RateLimitAction,
) -> Result<()> {
    match limiter.check_user(user_id, action, 1) {
        RateLimitDecision::Allowed => Ok(()),
        RateLimitDecision::Limited => Err(Error::RateLimited),
    }
}

fn require_verified_email(user: &UserRecord) -> Result<()> {
    if user.email_verified {
        Ok(())
    } else {
        Err(Error::Authorization)
    }
}

/// A session may touch second-factor material only once it has passed a
/// second factor itself, unless the user has none registered yet.
fn require_second_factor(user: &UserRecord, two_factor_verified: bool) -> Result<()> {
    if user.registered_2fa() && !two_factor_verified {
        return Err(Error::Authorization);
    }
    Ok(())
}

fn validate_new_password(password: &str) -> Result<()> {
    let len = password.chars().count();
    if (MIN_PASSWORD_LEN..=MAX_PASSWORD_LEN).contains(&len) {
        Ok(())
    } else {
        Err(Error::Validation(
            "password must be between 8 and 255 characters",
        ))
    }
}

/// Log in with a passkey or security-key assertion.
///
/// A verified assertion is two-factor-equivalent, so the session starts
/// verified.
pub async fn login_with_assertion(
    pool: &PgPool,
    config: &AuthConfig,
    challenges: &dyn ChallengeConsumer,
    kind: CredentialKind,
    request: &AssertionRequest,
) -> Result<EstablishedSession> {
    let verified = verify_assertion(pool, config, challenges, kind, request).await?;
    let token = create_session(
        pool,
        verified.user_id,
        SessionFlags {
            two_factor_verified: true,
        },
        config.session_ttl_seconds(),
    )
    .await?;
    info!(user_id = verified.user_id, "assertion login");
    Ok(EstablishedSession {
        token,
        user_id: verified.user_id,
    })
}

/// Register or replace the user's TOTP credential.
///
/// Requires a verified email, and a two-factor-verified session when the user
/// already has a second factor. The submitted code must prove possession of
/// the new key before it is stored.
pub async fn register_totp(
    pool: &PgPool,
    limiter: &dyn RateLimiter,
    user: &UserRecord,
    session: &SessionRecord,
    key: &[u8],
    code: &str,
) -> Result<()> {
    require_verified_email(user)?;
    require_second_factor(user, session.two_factor_verified)?;
    enforce_rate_limit(limiter, user.id, RateLimitAction::TotpUpdate)?;

    if key.len() != TOTP_KEY_LEN {
        return Err(Error::Validation("totp key must be 20 bytes"));
    }
    if !verify_totp(key, code) {
        return Err(Error::Authentication(Denial::InvalidCode));
    }

    add_or_replace_totp(pool, user.id, key, &session.session_hash).await?;
    info!(user_id = user.id, "totp credential registered");
    Ok(())
}

/// Promote the acting session to two-factor verified with a TOTP code.
pub async fn verify_totp_code(
    pool: &PgPool,
    limiter: &dyn RateLimiter,
    user: &UserRecord,
    session: &SessionRecord,
    code: &str,
) -> Result<()> {
    if !user.registered_totp {
        return Err(Error::Authorization);
    }
    enforce_rate_limit(limiter, user.id, RateLimitAction::TotpVerify)?;

    let key = get_totp_key(pool, user.id)
        .await?
        .ok_or(Error::Authorization)?;
    if !verify_totp(&key, code) {
        return Err(Error::Authentication(Denial::InvalidCode));
    }

    mark_two_factor_verified(pool, &session.session_hash).await?;
    Ok(())
}

/// Remove the user's TOTP credential.
///
/// Gated like registration: a user with a second factor must act from a
/// two-factor-verified session, while a user without one removes nothing
/// and succeeds.
pub async fn remove_totp(
    pool: &PgPool,
    limiter: &dyn RateLimiter,
    user: &UserRecord,
    session: &SessionRecord,
) -> Result<()> {
    require_verified_email(user)?;
    require_second_factor(user, session.two_factor_verified)?;
    enforce_rate_limit(limiter, user.id, RateLimitAction::TotpUpdate)?;
    delete_totp(pool, user.id).await?;
    info!(user_id = user.id, "totp credential removed");
    Ok(())
}

/// Store a new passkey or security-key credential.
///
/// The public key must parse under the declared algorithm before anything is
/// written; storing an unverifiable key would turn later assertions into
/// server faults.
pub async fn register_webauthn_credential(
    pool: &PgPool,
    user: &UserRecord,
    session: &SessionRecord,
    kind: CredentialKind,
    credential_id: &[u8],
    name: &str,
    algorithm_id: i32,
    public_key: &[u8],
) -> Result<()> {
    require_verified_email(user)?;
    require_second_factor(user, session.two_factor_verified)?;

    let algorithm =
        CoseAlgorithm::from_id(algorithm_id).ok_or(Error::Validation("unsupported algorithm"))?;
    match algorithm {
        CoseAlgorithm::Es256 => {
            p256::ecdsa::VerifyingKey::from_sec1_bytes(public_key)
                .map_err(|_| Error::Validation("invalid ES256 public key"))?;
        }
        CoseAlgorithm::Rs256 => {
            use rsa::pkcs1::DecodeRsaPublicKey;
            rsa::RsaPublicKey::from_pkcs1_der(public_key)
                .map_err(|_| Error::Validation("invalid RS256 public key"))?;
        }
    }
    if name.is_empty() || name.len() > 100 {
        return Err(Error::Validation("credential name must be 1-100 bytes"));
    }

    let record = WebAuthnCredentialRecord {
        id: credential_id.to_vec(),
        user_id: user.id,
        name: name.to_string(),
        algorithm: algorithm_id,
        public_key: public_key.to_vec(),
    };
    match kind {
        CredentialKind::Passkey => add_passkey(pool, &record, &session.session_hash).await?,
        CredentialKind::SecurityKey => {
            add_security_key(pool, &record, &session.session_hash).await?;
        }
    }
    info!(user_id = user.id, kind = ?kind, "webauthn credential registered");
    Ok(())
}

/// Delete one of the user's passkey or security-key credentials.
pub async fn remove_webauthn_credential(
    pool: &PgPool,
    user: &UserRecord,
    session: &SessionRecord,
    kind: CredentialKind,
    credential_id: &[u8],
) -> Result<()> {
    if !session.two_factor_verified {
        return Err(Error::Authorization);
    }
    let deleted = match kind {
        CredentialKind::Passkey => delete_passkey(pool, user.id, credential_id).await?,
        CredentialKind::SecurityKey => {
            delete_security_key(pool, user.id, credential_id).await?
        }
    };
    if !deleted {
        return Err(Error::Authentication(Denial::UnknownCredential));
    }
    Ok(())
}

/// Redeem a recovery code, stripping every second factor and demoting all
/// sessions.
pub async fn redeem_recovery_code(
    pool: &PgPool,
    limiter: &dyn RateLimiter,
    user: &UserRecord,
    presented_code: &str,
) -> Result<()> {
    enforce_rate_limit(limiter, user.id, RateLimitAction::RecoveryCode)?;
    if consume_recovery_code(pool, user.id, presented_code).await? {
        info!(user_id = user.id, "recovery code consumed");
        Ok(())
    } else {
        Err(Error::Authentication(Denial::InvalidRecoveryCode))
    }
}

/// Show the current recovery code so the user can store it safely.
pub async fn current_recovery_code(
    pool: &PgPool,
    user: &UserRecord,
    session: &SessionRecord,
) -> Result<String> {
    require_second_factor(user, session.two_factor_verified)?;
    get_recovery_code(pool, user.id)
        .await?
        .ok_or_else(|| Error::Internal(anyhow::anyhow!("user {} has no recovery code", user.id)))
}

/// Issue a fresh recovery code, invalidating the old one.
pub async fn regenerate_recovery_code(
    pool: &PgPool,
    user: &UserRecord,
    session: &SessionRecord,
) -> Result<String> {
    require_second_factor(user, session.two_factor_verified)?;
    rotate_recovery_code(pool, user.id).await
}

/// Change the password from an authenticated session.
///
/// All other sessions are deleted; the acting one survives.
pub async fn change_password(
    pool: &PgPool,
    limiter: &dyn RateLimiter,
    user: &UserRecord,
    session: &SessionRecord,
    current_password: &str,
    new_password: &str,
) -> Result<()> {
    enforce_rate_limit(limiter, user.id, RateLimitAction::PasswordChange)?;
    validate_new_password(new_password)?;

    let stored_hash = get_password_hash(pool, user.id)
        .await?
        .ok_or(Error::Authorization)?;
    if !verify_password(current_password, &stored_hash) {
        return Err(Error::Authentication(Denial::InvalidPassword));
    }

    let new_hash = hash_password(new_password)?;
    update_password(pool, &session.session_hash, user.id, &new_hash).await?;
    info!(user_id = user.id, "password changed");
    Ok(())
}

/// Begin a password reset for the account behind `email`.
///
/// Returns `None` for unknown or unverified addresses so the response cannot
/// be used to enumerate accounts.
pub async fn start_password_reset(
    pool: &PgPool,
    config: &AuthConfig,
    email: &str,
) -> Result<Option<String>> {
    let Some(user) = get_user_by_email(pool, email).await? else {
        return Ok(None);
    };
    if !user.email_verified {
        return Ok(None);
    }
    let token =
        create_reset_session(pool, user.id, &user.email, config.reset_session_ttl_seconds())
            .await?;
    info!(user_id = user.id, "password reset started");
    Ok(Some(token))
}

/// Routing decision for the reset flow's second-factor step.
#[must_use]
pub fn reset_two_factor_gate(user: &UserRecord, session: &ResetSessionRecord) -> TwoFactorGate {
    two_factor_gate(user, session)
}

/// Pass the reset flow's second-factor step with a TOTP code.
pub async fn verify_reset_totp(
    pool: &PgPool,
    limiter: &dyn RateLimiter,
    user: &UserRecord,
    session: &ResetSessionRecord,
    code: &str,
) -> Result<()> {
    if !user.registered_totp {
        return Err(Error::Authorization);
    }
    enforce_rate_limit(limiter, user.id, RateLimitAction::TotpVerify)?;

    let key = get_totp_key(pool, user.id)
        .await?
        .ok_or(Error::Authorization)?;
    if !verify_totp(&key, code) {
        return Err(Error::Authentication(Denial::InvalidCode));
    }

    mark_reset_two_factor_verified(pool, &session.session_hash).await?;
    Ok(())
}

/// Pass the reset flow's second-factor step with an assertion.
///
/// The asserted credential must belong to the user who opened the reset.
pub async fn verify_reset_assertion(
    pool: &PgPool,
    config: &AuthConfig,
    challenges: &dyn ChallengeConsumer,
    kind: CredentialKind,
    session: &ResetSessionRecord,
    request: &AssertionRequest,
) -> Result<()> {
    let verified = verify_assertion(pool, config, challenges, kind, request).await?;
    if verified.user_id != session.user_id {
        return Err(Error::Authentication(Denial::UnknownCredential));
    }
    mark_reset_two_factor_verified(pool, &session.session_hash).await?;
    Ok(())
}

/// Complete a password reset, logging the user out everywhere.
///
/// The stored email must still match the one the reset was initiated against;
/// a concurrent email change fails the whole cascade. On success every
/// session is gone and a fresh one is issued, carrying over the reset
/// session's two-factor state.
pub async fn complete_password_reset(
    pool: &PgPool,
    config: &AuthConfig,
    user: &UserRecord,
    session: &ResetSessionRecord,
    new_password: &str,
) -> Result<EstablishedSession> {
    if matches!(
        two_factor_gate(user, session),
        TwoFactorGate::StepRequired(_)
    ) {
        return Err(Error::Authorization);
    }
    validate_new_password(new_password)?;

    let new_hash = hash_password(new_password)?;
    let updated = update_password_with_email(pool, user.id, &session.email, &new_hash).await?;
    if !updated {
        // The cascade rolled back; the stale reset session is useless now.
        invalidate_reset_session(pool, &session.session_hash).await?;
        return Err(Error::Authentication(Denial::EmailMismatch));
    }

    let token = create_session(
        pool,
        user.id,
        SessionFlags {
            two_factor_verified: session.two_factor_verified,
        },
        config.session_ttl_seconds(),
    )
    .await?;
    info!(user_id = user.id, "password reset completed");
    Ok(EstablishedSession {
        token,
        user_id: user.id,
    })
}

/// Delete the acting session.
pub async fn logout(pool: &PgPool, session: &SessionRecord) -> Result<()> {
    invalidate_session(pool, &session.session_hash).await
}

#[cfg(test)]
mod tests {
    use super::{
        enforce_rate_limit, require_second_factor, require_verified_email, validate_new_password,
    };
    use crate::error::Error;
    use crate::rate_limit::{NoopRateLimiter, RateLimitAction, RateLimitDecision, RateLimiter};
    use crate::store::users::UserRecord;
    use chrono::Utc;

    struct DenyAll;

    impl RateLimiter for DenyAll {
        fn check_user(
            &self,
            _user_id: i64,
            _action: RateLimitAction,
            _cost: u32,
        ) -> RateLimitDecision {
            RateLimitDecision::Limited
        }
    }

    fn user(email_verified: bool, registered_totp: bool) -> UserRecord {
        UserRecord {
            id: 1,
            email: "user@example.com".to_string(),
            username: "user".to_string(),
            email_verified,
            created_at: Utc::now(),
            registered_totp,
            registered_passkey: false,
            registered_security_key: false,
        }
    }

    #[test]
    fn unverified_email_is_denied() {
        assert!(matches!(
            require_verified_email(&user(false, false)),
            Err(Error::Authorization)
        ));
        assert!(require_verified_email(&user(true, false)).is_ok());
    }

    #[test]
    fn second_factor_gating_tracks_registration() {
        // No second factor registered: an unverified session may proceed.
        assert!(require_second_factor(&user(true, false), false).is_ok());
        // Second factor registered: the session must have passed one.
        assert!(matches!(
            require_second_factor(&user(true, true), false),
            Err(Error::Authorization)
        ));
        assert!(require_second_factor(&user(true, true), true).is_ok());
    }

    #[test]
    fn totp_removal_is_gated_like_registration() {
        // No factor on file: an unverified session may remove (a no-op),
        // as long as the email is verified.
        let bare = user(true, false);
        assert!(require_verified_email(&bare).is_ok());
        assert!(require_second_factor(&bare, false).is_ok());

        // A registered factor demands a two-factor-verified session.
        let enrolled = user(true, true);
        assert!(matches!(
            require_second_factor(&enrolled, false),
            Err(Error::Authorization)
        ));
        assert!(require_second_factor(&enrolled, true).is_ok());

        // An unverified email is denied outright.
        assert!(matches!(
            require_verified_email(&user(false, true)),
            Err(Error::Authorization)
        ));
    }

    #[test]
    fn password_length_bounds() {
        assert!(validate_new_password("hunter2!").is_ok());
        assert!(matches!(
            validate_new_password("short"),
            Err(Error::Validation(_))
        ));
        let long = "x".repeat(256);
        assert!(matches!(
            validate_new_password(&long),
            Err(Error::Validation(_))
        ));
        let max = "x".repeat(255);
        assert!(validate_new_password(&max).is_ok());
    }

    #[test]
    fn rate_limit_decisions_map_to_errors() {
        assert!(enforce_rate_limit(&NoopRateLimiter, 1, RateLimitAction::TotpVerify).is_ok());
        assert!(matches!(
            enforce_rate_limit(&DenyAll, 1, RateLimitAction::TotpVerify),
            Err(Error::RateLimited)
        ));
    }
}
