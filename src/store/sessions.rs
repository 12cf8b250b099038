//! Session lifecycle.
//!
//! A session is addressed by the SHA-256 of its bearer token. Lifecycle per
//! session: created (two-factor flag set or unset) → two-factor verified
//! (one-way, except bulk demotion on recovery) → deleted.

use chrono::{DateTime, Duration, Utc};
use sqlx::{postgres::PgRow, PgPool, Row};
use tracing::Instrument;

use super::is_unique_violation;
use super::users::{user_from_row, UserRecord, USER_COLUMNS};
use crate::error::{Error, Result};
use crate::token::{generate_session_token, hash_session_token};

const SESSION_INSERT_ATTEMPTS: usize = 3;

/// Flags applied at session creation.
///
/// Password-only logins start unverified; a passkey or security-key login
/// starts verified because the assertion itself is a second factor.
#[derive(Clone, Copy, Debug, Default)]
pub struct SessionFlags {
    pub two_factor_verified: bool,
}

#[derive(Clone, Debug)]
pub struct SessionRecord {
    pub session_hash: Vec<u8>,
    pub user_id: i64,
    pub two_factor_verified: bool,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

fn session_from_row(row: &PgRow) -> SessionRecord {
    SessionRecord {
        session_hash: row.get("session_hash"),
        user_id: row.get("user_id"),
        two_factor_verified: row.get("two_factor_verified"),
        // Aliased in the join; `users.created_at` shares the bare name.
        created_at: row.get("session_created_at"),
        expires_at: row.get("expires_at"),
    }
}

/// Create a session and return the raw bearer token.
///
/// Only the token hash is stored. Insertion retries on the (astronomically
/// unlikely) token-hash collision.
pub async fn create_session(
    pool: &PgPool,
    user_id: i64,
    flags: SessionFlags,
    ttl_seconds: i64,
) -> Result<String> {
    let query = "INSERT INTO sessions (session_hash, user_id, two_factor_verified, created_at, expires_at)
        VALUES ($1, $2, $3, NOW(), NOW() + ($4 * INTERVAL '1 second'))";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );

    for _ in 0..SESSION_INSERT_ATTEMPTS {
        let token = generate_session_token()?;
        let token_hash = hash_session_token(&token);
        let result = sqlx::query(query)
            .bind(&token_hash)
            .bind(user_id)
            .bind(flags.two_factor_verified)
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
        "failed to generate unique session token"
    )))
}

/// Resolve a bearer token into its session and owning user.
///
/// Expired sessions are deleted on sight. A session past half its lifetime is
/// extended back to the full TTL, so active users are never logged out.
pub async fn validate_and_refresh(
    pool: &PgPool,
    token: &str,
    ttl_seconds: i64,
) -> Result<Option<(SessionRecord, UserRecord)>> {
    let token_hash = hash_session_token(token);

    let query = format!(
        "SELECT sessions.session_hash, sessions.user_id, sessions.two_factor_verified,
            sessions.created_at AS session_created_at, sessions.expires_at, {USER_COLUMNS}
        FROM sessions
        JOIN users ON users.id = sessions.user_id
        WHERE sessions.session_hash = $1"
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
    let session = session_from_row(&row);
    let user = user_from_row(&row);

    let now = Utc::now();
    if session.expires_at <= now {
        invalidate_session(pool, &session.session_hash).await?;
        return Ok(None);
    }

    if session.expires_at - now < Duration::seconds(ttl_seconds / 2) {
        let query = "UPDATE sessions
            SET expires_at = NOW() + ($2 * INTERVAL '1 second')
            WHERE session_hash = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(&session.session_hash)
            .bind(ttl_seconds)
            .execute(pool)
            .instrument(span)
            .await?;
    }

    Ok(Some((session, user)))
}

/// Promote a session to two-factor verified. One-way.
pub async fn mark_two_factor_verified(pool: &PgPool, session_hash: &[u8]) -> Result<()> {
    let query = "UPDATE sessions SET two_factor_verified = TRUE WHERE session_hash = $1";
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

/// Delete one session. Idempotent; logout of a missing session is fine.
pub async fn invalidate_session(pool: &PgPool, session_hash: &[u8]) -> Result<()> {
    let query = "DELETE FROM sessions WHERE session_hash = $1";
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

/// Delete every session the user holds.
pub async fn invalidate_all_sessions(pool: &PgPool, user_id: i64) -> Result<()> {
    let query = "DELETE FROM sessions WHERE user_id = $1";
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

/// Delete every session except the acting one.
pub async fn invalidate_all_sessions_except(
    pool: &PgPool,
    user_id: i64,
    keep_session_hash: &[u8],
) -> Result<()> {
    let query = "DELETE FROM sessions WHERE user_id = $1 AND session_hash != $2";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .bind(keep_session_hash)
        .execute(pool)
        .instrument(span)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::SessionFlags;

    #[test]
    fn default_flags_start_unverified() {
        let flags = SessionFlags::default();
        assert!(!flags.two_factor_verified);
    }
}
