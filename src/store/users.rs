//! User rows, derived credential flags, and account-recovery cascades.
//!
//! The `registered_*` booleans are never stored: every read recomputes them
//! from live credential-table membership, so they cannot drift across a
//! credential change.

use chrono::{DateTime, Utc};
use sqlx::{postgres::PgRow, PgPool, Row};
use tracing::Instrument;

use crate::error::Result;
use crate::token::generate_recovery_code;

/// Column list shared by every query that materializes a [`UserRecord`].
pub(crate) const USER_COLUMNS: &str = r"
    users.id, users.email, users.username, users.email_verified, users.created_at,
    EXISTS(SELECT 1 FROM totp_credentials WHERE totp_credentials.user_id = users.id) AS registered_totp,
    EXISTS(SELECT 1 FROM passkey_credentials WHERE passkey_credentials.user_id = users.id) AS registered_passkey,
    EXISTS(SELECT 1 FROM security_key_credentials WHERE security_key_credentials.user_id = users.id) AS registered_security_key";

#[derive(Clone, Debug)]
pub struct UserRecord {
    pub id: i64,
    pub email: String,
    pub username: String,
    pub email_verified: bool,
    pub created_at: DateTime<Utc>,
    pub registered_totp: bool,
    pub registered_passkey: bool,
    pub registered_security_key: bool,
}

impl UserRecord {
    /// Derived on every call; never cached across credential changes.
    #[must_use]
    pub fn registered_2fa(&self) -> bool {
        self.registered_totp || self.registered_passkey || self.registered_security_key
    }
}

pub(crate) fn user_from_row(row: &PgRow) -> UserRecord {
    UserRecord {
        id: row.get("id"),
        email: row.get("email"),
        username: row.get("username"),
        email_verified: row.get("email_verified"),
        created_at: row.get("created_at"),
        registered_totp: row.get("registered_totp"),
        registered_passkey: row.get("registered_passkey"),
        registered_security_key: row.get("registered_security_key"),
    }
}

pub async fn get_user(pool: &PgPool, user_id: i64) -> Result<Option<UserRecord>> {
    let query = format!("SELECT {USER_COLUMNS} FROM users WHERE users.id = $1");
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = %query
    );
    let row = sqlx::query(&query)
        .bind(user_id)
        .fetch_optional(pool)
        .instrument(span)
        .await?;
    Ok(row.as_ref().map(user_from_row))
}

pub async fn get_user_by_email(pool: &PgPool, email: &str) -> Result<Option<UserRecord>> {
    let query = format!("SELECT {USER_COLUMNS} FROM users WHERE users.email = $1");
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = %query
    );
    let row = sqlx::query(&query)
        .bind(email)
        .fetch_optional(pool)
        .instrument(span)
        .await?;
    Ok(row.as_ref().map(user_from_row))
}

pub async fn get_password_hash(pool: &PgPool, user_id: i64) -> Result<Option<String>> {
    let query = "SELECT password_hash FROM users WHERE id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(user_id)
        .fetch_optional(pool)
        .instrument(span)
        .await?;
    Ok(row.map(|row| row.get("password_hash")))
}

pub async fn get_recovery_code(pool: &PgPool, user_id: i64) -> Result<Option<String>> {
    let query = "SELECT recovery_code FROM users WHERE id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(user_id)
        .fetch_optional(pool)
        .instrument(span)
        .await?;
    Ok(row.map(|row| row.get("recovery_code")))
}

/// Rotate the recovery code unconditionally and return the new value.
pub async fn rotate_recovery_code(pool: &PgPool, user_id: i64) -> Result<String> {
    let code = generate_recovery_code()?;
    let query = "UPDATE users SET recovery_code = $1 WHERE id = $2";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(&code)
        .bind(user_id)
        .execute(pool)
        .instrument(span)
        .await?;
    Ok(code)
}

/// Atomically consume a recovery code and reset every second factor.
///
/// The rotation is conditioned on the presented code matching the stored
/// value inside one transaction, so two concurrent calls presenting the same
/// code cannot both observe a match: the second sees zero rows updated and
/// returns false with no side effects.
pub async fn consume_recovery_code(
    pool: &PgPool,
    user_id: i64,
    presented_code: &str,
) -> Result<bool> {
    let replacement = generate_recovery_code()?;
    let mut tx = pool.begin().await?;

    let query = "UPDATE users SET recovery_code = $1 WHERE id = $2 AND recovery_code = $3";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(&replacement)
        .bind(user_id)
        .bind(presented_code)
        .execute(&mut *tx)
        .instrument(span)
        .await?;

    if result.rows_affected() == 0 {
        // Wrong code, or another request already consumed it.
        tx.rollback().await?;
        return Ok(false);
    }

    // The code was spent in place of a lost factor: drop every registered
    // second factor and demote all of the user's sessions.
    for query in [
        "DELETE FROM totp_credentials WHERE user_id = $1",
        "DELETE FROM passkey_credentials WHERE user_id = $1",
        "DELETE FROM security_key_credentials WHERE user_id = $1",
        "UPDATE sessions SET two_factor_verified = FALSE WHERE user_id = $1",
    ] {
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "EXECUTE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(user_id)
            .execute(&mut *tx)
            .instrument(span)
            .await?;
    }

    tx.commit().await?;
    Ok(true)
}

/// Replace the password hash for an authenticated user, keeping only the
/// acting session alive.
pub async fn update_password(
    pool: &PgPool,
    keep_session_hash: &[u8],
    user_id: i64,
    password_hash: &str,
) -> Result<()> {
    let mut tx = pool.begin().await?;

    let query = "UPDATE users SET password_hash = $1 WHERE id = $2";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(password_hash)
        .bind(user_id)
        .execute(&mut *tx)
        .instrument(span)
        .await?;

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
        .execute(&mut *tx)
        .instrument(span)
        .await?;

    tx.commit().await?;
    Ok(())
}

/// Replace the password hash only if `email` still matches the account, then
/// log the user out everywhere, reset sessions included.
///
/// Returns false (and commits nothing) when the email no longer matches,
/// which guards against a concurrent email change.
pub async fn update_password_with_email(
    pool: &PgPool,
    user_id: i64,
    email: &str,
    password_hash: &str,
) -> Result<bool> {
    let mut tx = pool.begin().await?;

    let query = "UPDATE users SET password_hash = $1 WHERE id = $2 AND email = $3";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(password_hash)
        .bind(user_id)
        .bind(email)
        .execute(&mut *tx)
        .instrument(span)
        .await?;

    if result.rows_affected() == 0 {
        tx.rollback().await?;
        return Ok(false);
    }

    for query in [
        "DELETE FROM sessions WHERE user_id = $1",
        "DELETE FROM password_reset_sessions WHERE user_id = $1",
    ] {
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(user_id)
            .execute(&mut *tx)
            .instrument(span)
            .await?;
    }

    tx.commit().await?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::UserRecord;
    use crate::token::generate_recovery_code;
    use chrono::Utc;
    use std::sync::{Arc, Mutex};

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

    #[test]
    fn registered_2fa_is_or_of_factors() {
        assert!(!user(false, false, false).registered_2fa());
        assert!(user(true, false, false).registered_2fa());
        assert!(user(false, true, false).registered_2fa());
        assert!(user(false, false, true).registered_2fa());
        assert!(user(true, true, true).registered_2fa());
    }

    // Model of the compare-and-rotate transaction: the conditional update and
    // the cascade are one atomic step, mirroring what the database provides
    // through transaction isolation.
    struct InMemoryAccount {
        recovery_code: String,
        has_totp: bool,
        passkey_count: usize,
        security_key_count: usize,
        session_verified: Vec<bool>,
    }

    impl InMemoryAccount {
        fn new(code: &str) -> Self {
            Self {
                recovery_code: code.to_string(),
                has_totp: true,
                passkey_count: 1,
                security_key_count: 1,
                session_verified: vec![true, true, false],
            }
        }

        fn consume(&mut self, presented: &str) -> bool {
            if presented != self.recovery_code {
                return false;
            }
            self.recovery_code = generate_recovery_code().unwrap();
            self.has_totp = false;
            self.passkey_count = 0;
            self.security_key_count = 0;
            for verified in &mut self.session_verified {
                *verified = false;
            }
            true
        }

        fn registered_2fa(&self) -> bool {
            self.has_totp || self.passkey_count > 0 || self.security_key_count > 0
        }
    }

    #[test]
    fn concurrent_consumption_admits_exactly_one_caller() {
        let code = generate_recovery_code().unwrap();
        let account = Arc::new(Mutex::new(InMemoryAccount::new(&code)));

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let account = Arc::clone(&account);
                let code = code.clone();
                std::thread::spawn(move || account.lock().unwrap().consume(&code))
            })
            .collect();
        let outcomes: Vec<bool> = handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .collect();

        assert_eq!(outcomes.iter().filter(|ok| **ok).count(), 1);
    }

    // Model of the two password-cascade transactions: the hash swap and the
    // session sweep are one atomic step, and the email-conditioned variant
    // commits nothing on a mismatch.
    struct InMemoryPasswordAccount {
        email: String,
        password_hash: String,
        sessions: Vec<u8>,
        reset_sessions: Vec<u8>,
    }

    impl InMemoryPasswordAccount {
        fn new() -> Self {
            Self {
                email: "user@example.com".to_string(),
                password_hash: "old-hash".to_string(),
                sessions: vec![1, 2, 3],
                reset_sessions: vec![9],
            }
        }

        fn update_password(&mut self, keep_session: u8, password_hash: &str) {
            self.password_hash = password_hash.to_string();
            self.sessions.retain(|id| *id == keep_session);
        }

        fn update_password_with_email(&mut self, email: &str, password_hash: &str) -> bool {
            if email != self.email {
                return false;
            }
            self.password_hash = password_hash.to_string();
            self.sessions.clear();
            self.reset_sessions.clear();
            true
        }
    }

    #[test]
    fn authenticated_change_keeps_only_the_acting_session() {
        let mut account = InMemoryPasswordAccount::new();
        account.update_password(2, "new-hash");

        assert_eq!(account.password_hash, "new-hash");
        assert_eq!(account.sessions, vec![2]);
        // Reset sessions are untouched by the authenticated path.
        assert_eq!(account.reset_sessions, vec![9]);
    }

    #[test]
    fn verified_reset_logs_out_everywhere() {
        let mut account = InMemoryPasswordAccount::new();
        assert!(account.update_password_with_email("user@example.com", "new-hash"));

        assert_eq!(account.password_hash, "new-hash");
        assert!(account.sessions.is_empty());
        assert!(account.reset_sessions.is_empty());
    }

    #[test]
    fn email_mismatch_commits_nothing() {
        let mut account = InMemoryPasswordAccount::new();
        assert!(!account.update_password_with_email("moved@example.com", "new-hash"));

        assert_eq!(account.password_hash, "old-hash");
        assert_eq!(account.sessions, vec![1, 2, 3]);
        assert_eq!(account.reset_sessions, vec![9]);
    }

    #[test]
    fn consumption_strips_factors_and_demotes_sessions() {
        let code = generate_recovery_code().unwrap();
        let mut account = InMemoryAccount::new(&code);
        assert!(account.registered_2fa());

        assert!(account.consume(&code));
        assert!(!account.registered_2fa());
        assert!(account.session_verified.iter().all(|verified| !verified));
        // The rotated code replaces the spent one.
        assert!(!account.consume(&code));
    }
}
