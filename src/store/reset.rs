//! Password-reset sessions and the reset-flow 2FA gate.
//!
//! Reset sessions are short-lived, scoped to one user and the email the reset
//! was initiated against, and carry their own two-factor flag. The gate is
//! enforced before the reset may complete: a user with a registered second
//! factor must verify it on the reset session first.

use chrono::{DateTime, Utc};
use sqlx::{postgres::PgRow, PgPool, Row};
use tracing::Instrument;

use super::is_unique_violation;
use super::users::{user_from_row, UserRecord, USER_COLUMNS};
use crate::error::{Error, Result};
use crate::token::{generate_session_token, hash_session_token};

const RESET_INSERT_ATTEMPTS: usize = 3;

#[derive(Clone, Debug)]
pub struct ResetSessionRecord {
    pub session_hash: Vec<u8>,
    pub user_id: i64,
    /// Account email at the time the reset was initiated. Must still match
    /// at completion.
    pub email: String,
    pub two_factor_verified: bool,
    pub expires_at: DateTime<Utc>,
}

fn reset_session_from_row(row: &PgRow) -> ResetSessionRecord {
    ResetSessionRecord {
        session_hash: row.get("session_hash"),
        user_id: row.get("user_id"),
        // Aliased in the join; `users.email` shares the bare name, and the
        // two may differ after a concurrent email change.
        email: row.get("reset_email"),
        two_factor_verified: row.get("two_factor_verified"),
        expires_at: row.get("expires_at"),
    }
}

/// Registered second-factor modalities a reset flow can route to.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SecondFactor {
    Passkey,
    SecurityKey,
    Totp,
}

/// Routing decision for the reset-flow 2FA step.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TwoFactorGate {
    /// The reset session already passed its second factor.
    AlreadyVerified,
    /// The user has no second factor; the gate is open.
    NotRegistered,
    /// The user must verify the given modality on this reset session.
    StepRequired(SecondFactor),
}

/// Decide how a reset flow proceeds past the 2FA step.
///
/// Preference order when several factors are registered: passkey, security
/// key, TOTP.
#[must_use]
pub fn two_factor_gate(user: &UserRecord, session: &ResetSessionRecord) -> TwoFactorGate {
    if session.two_factor_verified {
        return TwoFactorGate::AlreadyVerified;
    }
    if user.registered_passkey {
        TwoFactorGate::StepRequired(SecondFactor::Passkey)
    } else if user.registered_security_key {
        TwoFactorGate::StepRequired(SecondFactor::SecurityKey)
    } else if user.registered_totp {
        TwoFactorGate::StepRequired(SecondFactor::Totp)
    } else {
        TwoFactorGate::NotRegistered
    }
}

/// Create a reset session and return the raw bearer token.
pub async fn create_reset_session(
    pool: &PgPool,
    user_id: i64,
    email: &str,
    ttl_seconds: i64,
) -> Result<String> {
    let query = "INSERT INTO password_reset_sessions
            (session_hash, user_id, email, two_factor_verified, expires_at)
        VALUES ($1, $2, $3, FALSE, NOW() + ($4 * INTERVAL '1 second'))";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );

    for _ in 0..RESET_INSERT_ATTEMPTS {
        let token = generate_session_token()?;
        let token_hash = hash_session_token(&token);
        let result = sqlx::query(query)
            .bind(&token_hash)
            .bind(user_id)
            .bind(email)
            .bind(ttl_seconds)
            .execute(pool)
            .instrument(span.clone())
            .await;

        match result {
            Ok(_) => return Ok(token),
            Err(err) if is_unique_violation(&err) => {}
            Err(err) => return Err(err.into()),
        }
    }

    Err(Error::Internal(anyhow::anyhow!(
        "failed to generate unique reset session token"
    )))
}

/// Resolve a reset token into its session and owning user.
///
/// Expired reset sessions are deleted on sight; there is no refresh.
pub async fn validate_reset_session(
    pool: &PgPool,
    token: &str,
) -> Result<Option<(ResetSessionRecord, UserRecord)>> {
    let token_hash = hash_session_token(token);

    let query = format!(
        "SELECT password_reset_sessions.session_hash, password_reset_sessions.user_id,
            password_reset_sessions.email AS reset_email,
            password_reset_sessions.two_factor_verified,
            password_reset_sessions.expires_at, {USER_COLUMNS}
        FROM password_reset_sessions
        JOIN users ON users.id = password_reset_sessions.user_id
        WHERE password_reset_sessions.session_hash = $1"
    );
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = %query
    );
    let row = sqlx::query(&query)
        .bind(&token_hash)
        .fetch_optional(pool)
        .instrument(span)
        .await?;

    let Some(row) = row else {
        return Ok(None);
    };
    let session = reset_session_from_row(&row);
    let user = user_from_row(&row);

    if session.expires_at <= Utc::now() {
        invalidate_reset_session(pool, &session.session_hash).await?;
        return Ok(None);
    }

    Ok(Some((session, user)))
}

/// Mark a reset session as having passed its second factor.
pub async fn mark_reset_two_factor_verified(pool: &PgPool, session_hash: &[u8]) -> Result<()> {
    let query =
        "UPDATE password_reset_sessions SET two_factor_verified = TRUE WHERE session_hash = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(session_hash)
        .execute(pool)
        .instrument(span)
        .await?;
    Ok(())
}

pub async fn invalidate_reset_session(pool: &PgPool, session_hash: &[u8]) -> Result<()> {
    let query = "DELETE FROM password_reset_sessions WHERE session_hash = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(session_hash)
        .execute(pool)
        .instrument(span)
        .await?;
    Ok(())
}

/// Delete every reset session the user holds.
pub async fn invalidate_reset_sessions(pool: &PgPool, user_id: i64) -> Result<()> {
    let query = "DELETE FROM password_reset_sessions WHERE user_id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .execute(pool)
        .instrument(span)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{two_factor_gate, ResetSessionRecord, SecondFactor, TwoFactorGate};
    use crate::store::users::UserRecord;
    use chrono::{Duration, Utc};

    fn user(totp: bool, passkey: bool, security_key: bool) -> UserRecord {
        UserRecord {
            id: 1,
            email: "user@example.com".to_string(),
            username: "user".to_string(),
            email_verified: true,
            created_at: Utc::now(),
            registered_totp: totp,
            registered_passkey: passkey,
            registered_security_key: security_key,
        }
    }

    fn session(two_factor_verified: bool) -> ResetSessionRecord {
        ResetSessionRecord {
            session_hash: vec![1, 2, 3],
            user_id: 1,
            email: "user@example.com".to_string(),
            two_factor_verified,
            expires_at: Utc::now() + Duration::minutes(10),
        }
    }

    #[test]
    fn verified_session_passes_the_gate() {
        let gate = two_factor_gate(&user(true, true, true), &session(true));
        assert_eq!(gate, TwoFactorGate::AlreadyVerified);
    }

    #[test]
    fn no_second_factor_opens_the_gate() {
        let gate = two_factor_gate(&user(false, false, false), &session(false));
        assert_eq!(gate, TwoFactorGate::NotRegistered);
    }

    #[test]
    fn routing_prefers_passkey_then_security_key_then_totp() {
        assert_eq!(
            two_factor_gate(&user(true, true, true), &session(false)),
            TwoFactorGate::StepRequired(SecondFactor::Passkey)
        );
        assert_eq!(
            two_factor_gate(&user(true, false, true), &session(false)),
            TwoFactorGate::StepRequired(SecondFactor::SecurityKey)
        );
        assert_eq!(
            two_factor_gate(&user(true, false, false), &session(false)),
            TwoFactorGate::StepRequired(SecondFactor::Totp)
        );
    }

    #[test]
    fn gate_is_enforced_not_filtered() {
        // Even with factors registered, a verified session is never rerouted.
        let gate = two_factor_gate(&user(true, false, false), &session(true));
        assert_eq!(gate, TwoFactorGate::AlreadyVerified);
    }
}
