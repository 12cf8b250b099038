//! Password hashing behind an opaque hash/verify pair.
//!
//! The core never inspects hashes; it stores the encoded string and hands it
//! back for verification. Argon2id with default parameters.

use anyhow::{anyhow, Result};
use argon2::{
    password_hash::SaltString, Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
};
use rand::rngs::OsRng;

/// Hash a password for storage.
///
/// # Errors
/// Returns an error if the hasher fails (never for valid inputs).
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|_| anyhow!("failed to hash password"))?
        .to_string();
    Ok(hash)
}

/// Verify a password against a stored encoded hash.
#[must_use]
pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(stored_hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::{hash_password, verify_password};

    #[test]
    fn hash_and_verify_round_trip() {
        let hash = hash_password("correct horse battery staple").unwrap();
        assert!(verify_password("correct horse battery staple", &hash));
        assert!(!verify_password("correct horse battery", &hash));
    }

    #[test]
    fn hashes_are_salted() {
        let first = hash_password("password").unwrap();
        let second = hash_password("password").unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn garbage_hash_never_verifies() {
        assert!(!verify_password("password", "not-an-encoded-hash"));
    }
}
