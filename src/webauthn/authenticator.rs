//! Authenticator-data parsing.
//!
//! Layout per the WebAuthn spec: 32-byte relying-party id hash, 1 flag byte,
//! 4-byte big-endian signature counter, then optional attested-credential and
//! extension data this verifier does not need.

use sha2::{Digest, Sha256};

const RP_ID_HASH_LEN: usize = 32;
const MIN_AUTH_DATA_LEN: usize = RP_ID_HASH_LEN + 1 + 4;

const FLAG_USER_PRESENT: u8 = 1 << 0;
const FLAG_USER_VERIFIED: u8 = 1 << 2;

#[derive(Clone, Debug)]
pub struct AuthenticatorData {
    rp_id_hash: [u8; RP_ID_HASH_LEN],
    flags: u8,
    sign_count: u32,
}

impl AuthenticatorData {
    /// Parse raw authenticator data. Returns `None` when truncated.
    #[must_use]
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < MIN_AUTH_DATA_LEN {
            return None;
        }
        let mut rp_id_hash = [0u8; RP_ID_HASH_LEN];
        rp_id_hash.copy_from_slice(bytes.get(..RP_ID_HASH_LEN)?);
        let flags = *bytes.get(RP_ID_HASH_LEN)?;
        let count_bytes = bytes.get(RP_ID_HASH_LEN + 1..RP_ID_HASH_LEN + 5)?;
        let sign_count = u32::from_be_bytes(count_bytes.try_into().ok()?);
        Some(Self {
            rp_id_hash,
            flags,
            sign_count,
        })
    }

    /// Check that the embedded hash matches the configured relying-party id.
    #[must_use]
    pub fn verify_relying_party_id(&self, rp_id: &str) -> bool {
        let expected = Sha256::digest(rp_id.as_bytes());
        self.rp_id_hash == expected.as_slice()
    }

    #[must_use]
    pub fn user_present(&self) -> bool {
        self.flags & FLAG_USER_PRESENT != 0
    }

    #[must_use]
    pub fn user_verified(&self) -> bool {
        self.flags & FLAG_USER_VERIFIED != 0
    }

    #[must_use]
    pub fn sign_count(&self) -> u32 {
        self.sign_count
    }
}

#[cfg(test)]
pub(crate) fn encode(rp_id: &str, flags: u8, sign_count: u32) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(MIN_AUTH_DATA_LEN);
    bytes.extend_from_slice(&Sha256::digest(rp_id.as_bytes()));
    bytes.push(flags);
    bytes.extend_from_slice(&sign_count.to_be_bytes());
    bytes
}

#[cfg(test)]
mod tests {
    use super::{encode, AuthenticatorData, FLAG_USER_PRESENT, FLAG_USER_VERIFIED};

    #[test]
    fn parses_and_validates_rp_id_hash() {
        let bytes = encode("example.com", FLAG_USER_PRESENT | FLAG_USER_VERIFIED, 42);
        let data = AuthenticatorData::parse(&bytes).unwrap();
        assert!(data.verify_relying_party_id("example.com"));
        assert!(!data.verify_relying_party_id("evil.example.com"));
        assert!(data.user_present());
        assert!(data.user_verified());
        assert_eq!(data.sign_count(), 42);
    }

    #[test]
    fn flags_are_independent_bits() {
        let bytes = encode("example.com", FLAG_USER_PRESENT, 0);
        let data = AuthenticatorData::parse(&bytes).unwrap();
        assert!(data.user_present());
        assert!(!data.user_verified());
    }

    #[test]
    fn truncated_input_is_rejected() {
        let bytes = encode("example.com", FLAG_USER_PRESENT, 0);
        assert!(AuthenticatorData::parse(&bytes[..36]).is_none());
        assert!(AuthenticatorData::parse(&[]).is_none());
    }

    #[test]
    fn trailing_data_is_tolerated() {
        let mut bytes = encode("example.com", FLAG_USER_PRESENT, 0);
        bytes.extend_from_slice(&[0u8; 16]);
        assert!(AuthenticatorData::parse(&bytes).is_some());
    }
}
