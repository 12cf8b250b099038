//! Session and reset token generation and hashing.
//!
//! Raw tokens are only ever returned to the client; the database stores the
//! SHA-256 of the token and every lookup goes through the hash.

use anyhow::{Context, Result};
use base64::Engine;
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};

/// Create a new bearer token with 256 bits of entropy.
pub fn generate_session_token() -> Result<String> {
    let mut bytes = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate session token")?;
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes))
}

/// Hash a bearer token so raw values never touch the database.
#[must_use]
pub fn hash_session_token(token: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.finalize().to_vec()
}

/// Alphabet for recovery codes: uppercase letters and digits, minus the
/// characters users misread (I, O, 0, 1).
const RECOVERY_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const RECOVERY_CODE_LEN: usize = 16;

/// Create a fresh recovery code.
pub fn generate_recovery_code() -> Result<String> {
    let mut raw = [0u8; RECOVERY_CODE_LEN];
    OsRng
        .try_fill_bytes(&mut raw)
        .context("failed to generate recovery code")?;
    let mut code = String::with_capacity(RECOVERY_CODE_LEN);
    for byte in raw {
        let idx = usize::from(byte) % RECOVERY_CODE_ALPHABET.len();
        if let Some(&ch) = RECOVERY_CODE_ALPHABET.get(idx) {
            code.push(ch as char);
        }
    }
    Ok(code)
}

#[cfg(test)]
mod tests {
    use super::{generate_recovery_code, generate_session_token, hash_session_token};
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;

    #[test]
    fn session_token_decodes_to_32_bytes() {
        let decoded_len = generate_session_token()
            .ok()
            .and_then(|token| URL_SAFE_NO_PAD.decode(token.as_bytes()).ok())
            .map(|bytes| bytes.len());
        assert_eq!(decoded_len, Some(32));
    }

    #[test]
    fn hash_session_token_is_stable_and_collision_visible() {
        let first = hash_session_token("token");
        let second = hash_session_token("token");
        let different = hash_session_token("other");
        assert_eq!(first, second);
        assert_ne!(first, different);
        assert_eq!(first.len(), 32);
    }

    #[test]
    fn recovery_code_uses_restricted_alphabet() {
        let code = generate_recovery_code().unwrap();
        assert_eq!(code.len(), 16);
        assert!(code
            .bytes()
            .all(|ch| super::RECOVERY_CODE_ALPHABET.contains(&ch)));
    }

    #[test]
    fn recovery_codes_are_not_repeated() {
        let first = generate_recovery_code().unwrap();
        let second = generate_recovery_code().unwrap();
        assert_ne!(first, second);
    }
}
