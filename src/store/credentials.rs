//! Second-factor credential storage.
//!
//! TOTP credentials are unique per user and replaced with a delete-then-insert
//! inside one transaction. Passkeys and security keys are keyed by the
//! authenticator-issued credential id and looked up during login.

use sqlx::{postgres::PgRow, PgPool, Row};
use tracing::Instrument;

use crate::error::Result;

/// A stored WebAuthn public-key credential (passkey or security key).
#[derive(Clone, Debug)]
pub struct WebAuthnCredentialRecord {
    /// Authenticator-issued credential id, the login lookup key.
    pub id: Vec<u8>,
    pub user_id: i64,
    pub name: String,
    /// COSE algorithm identifier recorded at registration.
    pub algorithm: i32,
    /// SEC1 point for ES256, PKCS#1 DER for RS256.
    pub public_key: Vec<u8>,
}

fn credential_from_row(row: &PgRow) -> WebAuthnCredentialRecord {
    WebAuthnCredentialRecord {
        id: row.get("id"),
        user_id: row.get("user_id"),
        name: row.get("name"),
        algorithm: row.get("algorithm"),
        public_key: row.get("public_key"),
    }
}

pub async fn get_totp_key(pool: &PgPool, user_id: i64) -> Result<Option<Vec<u8>>> {
    let query = "SELECT key FROM totp_credentials WHERE user_id = $1";
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
    Ok(row.map(|row| row.get("key")))
}

/// Replace the user's TOTP credential and confirm the acting session.
///
/// The only path that both grants and confirms a second factor in one step:
/// delete-then-insert the credential, invalidate every other session, and
/// mark the acting session two-factor verified, all in one transaction.
pub async fn add_or_replace_totp(
    pool: &PgPool,
    user_id: i64,
    key: &[u8],
    current_session_hash: &[u8],
) -> Result<()> {
    let mut tx = pool.begin().await?;

    let query = "DELETE FROM totp_credentials WHERE user_id = $1";
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

    let query = "INSERT INTO totp_credentials (user_id, key) VALUES ($1, $2)";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .bind(key)
        .execute(&mut *tx)
        .instrument(span)
        .await?;

    confirm_acting_session(&mut tx, user_id, current_session_hash).await?;

    tx.commit().await?;
    Ok(())
}

pub async fn delete_totp(pool: &PgPool, user_id: i64) -> Result<()> {
    let query = "DELETE FROM totp_credentials WHERE user_id = $1";
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

pub async fn lookup_passkey(
    pool: &PgPool,
    credential_id: &[u8],
) -> Result<Option<WebAuthnCredentialRecord>> {
    let query = "SELECT id, user_id, name, algorithm, public_key
        FROM passkey_credentials WHERE id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(credential_id)
        .fetch_optional(pool)
        .instrument(span)
        .await?;
    Ok(row.as_ref().map(credential_from_row))
}

pub async fn lookup_security_key(
    pool: &PgPool,
    credential_id: &[u8],
) -> Result<Option<WebAuthnCredentialRecord>> {
    let query = "SELECT id, user_id, name, algorithm, public_key
        FROM security_key_credentials WHERE id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(credential_id)
        .fetch_optional(pool)
        .instrument(span)
        .await?;
    Ok(row.as_ref().map(credential_from_row))
}

/// Store a new passkey and confirm the acting session, mirroring the TOTP
/// replacement cascade.
pub async fn add_passkey(
    pool: &PgPool,
    credential: &WebAuthnCredentialRecord,
    current_session_hash: &[u8],
) -> Result<()> {
    insert_webauthn_credential(pool, "passkey_credentials", credential, current_session_hash).await
}

/// Store a new security key and confirm the acting session.
pub async fn add_security_key(
    pool: &PgPool,
    credential: &WebAuthnCredentialRecord,
    current_session_hash: &[u8],
) -> Result<()> {
    insert_webauthn_credential(
        pool,
        "security_key_credentials",
        credential,
        current_session_hash,
    )
    .await
}

async fn insert_webauthn_credential(
    pool: &PgPool,
    table: &'static str,
    credential: &WebAuthnCredentialRecord,
    current_session_hash: &[u8],
) -> Result<()> {
    let mut tx = pool.begin().await?;

    // Table names cannot be bound; both call sites pass a fixed identifier.
    let query = format!(
        "INSERT INTO {table} (id, user_id, name, algorithm, public_key)
        VALUES ($1, $2, $3, $4, $5)"
    );
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = %query
    );
    sqlx::query(&query)
        .bind(&credential.id)
        .bind(credential.user_id)
        .bind(&credential.name)
        .bind(credential.algorithm)
        .bind(&credential.public_key)
        .execute(&mut *tx)
        .instrument(span)
        .await?;

    confirm_acting_session(&mut tx, credential.user_id, current_session_hash).await?;

    tx.commit().await?;
    Ok(())
}

pub async fn delete_passkey(pool: &PgPool, user_id: i64, credential_id: &[u8]) -> Result<bool> {
    let query = "DELETE FROM passkey_credentials WHERE id = $1 AND user_id = $2";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(credential_id)
        .bind(user_id)
        .execute(pool)
        .instrument(span)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn delete_security_key(
    pool: &PgPool,
    user_id: i64,
    credential_id: &[u8],
) -> Result<bool> {
    let query = "DELETE FROM security_key_credentials WHERE id = $1 AND user_id = $2";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(credential_id)
        .bind(user_id)
        .execute(pool)
        .instrument(span)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Within a credential-granting transaction: drop the user's other sessions
/// and mark the acting one two-factor verified.
async fn confirm_acting_session(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    user_id: i64,
    current_session_hash: &[u8],
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
        .bind(current_session_hash)
        .execute(&mut **tx)
        .instrument(span)
        .await?;

    let query = "UPDATE sessions SET two_factor_verified = TRUE WHERE session_hash = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(current_session_hash)
        .execute(&mut **tx)
        .instrument(span)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::WebAuthnCredentialRecord;
    use crate::webauthn::CoseAlgorithm;

    #[test]
    fn credential_record_holds_values() {
        let record = WebAuthnCredentialRecord {
            id: vec![1, 2, 3],
            user_id: 7,
            name: "YubiKey".to_string(),
            algorithm: CoseAlgorithm::Es256.id(),
            public_key: vec![4, 5, 6],
        };
        assert_eq!(record.user_id, 7);
        assert_eq!(
            CoseAlgorithm::from_id(record.algorithm),
            Some(CoseAlgorithm::Es256)
        );
    }

    // Model of the replacement transaction: delete-then-insert plus the
    // session cascade happen as one atomic step.
    struct InMemoryTotpAccount {
        keys: Vec<Vec<u8>>,
        // (session id, two_factor_verified)
        sessions: Vec<(u8, bool)>,
    }

    impl InMemoryTotpAccount {
        fn replace_totp(&mut self, key: &[u8], acting_session: u8) {
            self.keys.clear();
            self.keys.push(key.to_vec());
            self.sessions.retain(|(id, _)| *id == acting_session);
            for session in &mut self.sessions {
                session.1 = true;
            }
        }
    }

    #[test]
    fn replacement_leaves_one_key_and_one_verified_session() {
        let mut account = InMemoryTotpAccount {
            keys: vec![vec![1u8; 20]],
            sessions: vec![(1, true), (2, false), (3, true)],
        };

        account.replace_totp(&[2u8; 20], 2);

        assert_eq!(account.keys, vec![vec![2u8; 20]]);
        assert_eq!(account.sessions, vec![(2, true)]);
    }
}
