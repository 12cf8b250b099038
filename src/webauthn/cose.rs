//! COSE signature algorithm identifiers.

/// Signature algorithms this verifier supports, as registered COSE ids.
///
/// Closed set on purpose: dispatch is exhaustive, and a credential stored
/// with any other id is a server-side defect, not a client error.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CoseAlgorithm {
    /// ECDSA with P-256 and SHA-256 (COSE -7).
    Es256,
    /// RSASSA-PKCS1-v1.5 with SHA-256 (COSE -257).
    Rs256,
}

impl CoseAlgorithm {
    pub const ES256_ID: i32 = -7;
    pub const RS256_ID: i32 = -257;

    #[must_use]
    pub fn from_id(id: i32) -> Option<Self> {
        match id {
            Self::ES256_ID => Some(Self::Es256),
            Self::RS256_ID => Some(Self::Rs256),
            _ => None,
        }
    }

    #[must_use]
    pub fn id(self) -> i32 {
        match self {
            Self::Es256 => Self::ES256_ID,
            Self::Rs256 => Self::RS256_ID,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::CoseAlgorithm;

    #[test]
    fn known_ids_round_trip() {
        assert_eq!(CoseAlgorithm::from_id(-7), Some(CoseAlgorithm::Es256));
        assert_eq!(CoseAlgorithm::from_id(-257), Some(CoseAlgorithm::Rs256));
        assert_eq!(CoseAlgorithm::Es256.id(), -7);
        assert_eq!(CoseAlgorithm::Rs256.id(), -257);
    }

    #[test]
    fn unknown_ids_are_rejected() {
        // EdDSA and ES384 are registered but not supported here.
        assert_eq!(CoseAlgorithm::from_id(-8), None);
        assert_eq!(CoseAlgorithm::from_id(-35), None);
        assert_eq!(CoseAlgorithm::from_id(0), None);
    }
}
