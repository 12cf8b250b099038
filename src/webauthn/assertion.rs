//! The assertion verification pipeline.

use base64::Engine;
use p256::ecdsa::signature::hazmat::PrehashVerifier;
use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::Pkcs1v15Sign;
use sha2::{Digest, Sha256};
use sqlx::PgPool;

use super::authenticator::AuthenticatorData;
use super::client_data::ClientData;
use super::cose::CoseAlgorithm;
use crate::challenge::ChallengeConsumer;
use crate::config::AuthConfig;
use crate::error::Denial;
use crate::store::credentials::{lookup_passkey, lookup_security_key, WebAuthnCredentialRecord};

const BASE64: base64::engine::general_purpose::GeneralPurpose =
    base64::engine::general_purpose::STANDARD;

/// Which credential table an assertion is asserted against.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CredentialKind {
    Passkey,
    SecurityKey,
}

/// A signed assertion as presented by the client, all fields base64-encoded.
#[derive(Clone, Debug)]
pub struct AssertionRequest {
    pub authenticator_data: String,
    pub client_data_json: String,
    pub credential_id: String,
    pub signature: String,
}

/// Verification failures, each a hard rejection.
#[derive(Debug, thiserror::Error)]
pub enum AssertionError {
    /// Undecodable or structurally invalid assertion material.
    #[error("malformed assertion")]
    Malformed,
    /// Challenge, origin, or cross-origin rejection from the client data.
    #[error("assertion challenge rejected")]
    Challenge,
    /// The presented credential id is not on file.
    #[error("unknown credential")]
    UnknownCredential,
    /// The signature does not verify against the stored public key.
    #[error("invalid assertion signature")]
    Signature,
    /// The stored credential uses a COSE algorithm this verifier cannot check.
    #[error("unsupported credential algorithm {0}")]
    Unsupported(i32),
    #[error(transparent)]
    Store(#[from] sqlx::Error),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<AssertionError> for crate::error::Error {
    fn from(err: AssertionError) -> Self {
        match err {
            AssertionError::Malformed => Self::Validation("malformed assertion"),
            AssertionError::Challenge => Self::Authentication(Denial::ChallengeRejected),
            AssertionError::UnknownCredential => Self::Authentication(Denial::UnknownCredential),
            AssertionError::Signature => Self::Authentication(Denial::InvalidSignature),
            AssertionError::Unsupported(id) => Self::UnsupportedCredential(id),
            AssertionError::Store(err) => Self::Store(err),
            AssertionError::Internal(err) => Self::Internal(err),
        }
    }
}

/// Raw assertion bytes after base64 decoding.
#[derive(Clone, Debug)]
pub struct DecodedAssertion {
    pub authenticator_data: Vec<u8>,
    pub client_data_json: Vec<u8>,
    pub credential_id: Vec<u8>,
    pub signature: Vec<u8>,
}

impl DecodedAssertion {
    pub fn decode(request: &AssertionRequest) -> Result<Self, AssertionError> {
        let decode = |field: &str| {
            BASE64
                .decode(field.as_bytes())
                .map_err(|_| AssertionError::Malformed)
        };
        Ok(Self {
            authenticator_data: decode(&request.authenticator_data)?,
            client_data_json: decode(&request.client_data_json)?,
            credential_id: decode(&request.credential_id)?,
            signature: decode(&request.signature)?,
        })
    }

    /// Validate the authenticator data and client-data JSON against the
    /// relying party configuration and the one-time challenge set.
    ///
    /// User presence and user verification are both required; a matched
    /// challenge is consumed whether or not the later signature check passes.
    pub fn check_client_payload(
        &self,
        config: &AuthConfig,
        challenges: &dyn ChallengeConsumer,
    ) -> Result<(), AssertionError> {
        let auth_data =
            AuthenticatorData::parse(&self.authenticator_data).ok_or(AssertionError::Malformed)?;
        if !auth_data.verify_relying_party_id(config.relying_party_id()) {
            return Err(AssertionError::Malformed);
        }
        if !auth_data.user_present() || !auth_data.user_verified() {
            return Err(AssertionError::Malformed);
        }

        let client_data =
            ClientData::parse(&self.client_data_json).ok_or(AssertionError::Malformed)?;
        if !client_data.is_assertion() {
            return Err(AssertionError::Malformed);
        }

        let challenge = client_data
            .challenge_bytes()
            .ok_or(AssertionError::Challenge)?;
        if !challenges.verify_and_consume(&challenge) {
            return Err(AssertionError::Challenge);
        }
        if client_data.origin != config.expected_origin() {
            return Err(AssertionError::Challenge);
        }
        if client_data.declares_cross_origin() {
            return Err(AssertionError::Challenge);
        }
        Ok(())
    }

    /// Verify the signature over `authData || SHA-256(clientDataJSON)`.
    pub fn verify_credential_signature(
        &self,
        credential: &WebAuthnCredentialRecord,
    ) -> Result<(), AssertionError> {
        let algorithm = CoseAlgorithm::from_id(credential.algorithm)
            .ok_or(AssertionError::Unsupported(credential.algorithm))?;

        let mut hasher = Sha256::new();
        hasher.update(&self.authenticator_data);
        hasher.update(Sha256::digest(&self.client_data_json));
        let digest = hasher.finalize();

        match algorithm {
            CoseAlgorithm::Es256 => {
                // The stored key was validated at registration; failure to
                // parse it is our fault, not the client's.
                let key = p256::ecdsa::VerifyingKey::from_sec1_bytes(&credential.public_key)
                    .map_err(|err| anyhow::anyhow!("stored ES256 key is invalid: {err}"))?;
                let signature = p256::ecdsa::Signature::from_der(&self.signature)
                    .map_err(|_| AssertionError::Signature)?;
                key.verify_prehash(&digest, &signature)
                    .map_err(|_| AssertionError::Signature)
            }
            CoseAlgorithm::Rs256 => {
                let key = rsa::RsaPublicKey::from_pkcs1_der(&credential.public_key)
                    .map_err(|err| anyhow::anyhow!("stored RS256 key is invalid: {err}"))?;
                key.verify(Pkcs1v15Sign::new::<Sha256>(), &digest, &self.signature)
                    .map_err(|_| AssertionError::Signature)
            }
        }
    }
}

/// The outcome of a fully verified assertion.
///
/// A successful assertion proves possession of the credential and counts as a
/// second factor on its own.
#[derive(Clone, Copy, Debug)]
pub struct VerifiedAssertion {
    pub user_id: i64,
}

/// Run the full pipeline: decode, validate the client payload, resolve the
/// credential, and verify the signature.
pub async fn verify_assertion(
    pool: &PgPool,
    config: &AuthConfig,
    challenges: &dyn ChallengeConsumer,
    kind: CredentialKind,
    request: &AssertionRequest,
) -> Result<VerifiedAssertion, AssertionError> {
    let decoded = DecodedAssertion::decode(request)?;
    decoded.check_client_payload(config, challenges)?;

    let credential = match kind {
        CredentialKind::Passkey => lookup_passkey(pool, &decoded.credential_id).await,
        CredentialKind::SecurityKey => lookup_security_key(pool, &decoded.credential_id).await,
    }
    .map_err(|err| match err {
        crate::error::Error::Store(err) => AssertionError::Store(err),
        other => AssertionError::Internal(anyhow::anyhow!(other)),
    })?
    .ok_or(AssertionError::UnknownCredential)?;

    decoded.verify_credential_signature(&credential)?;

    Ok(VerifiedAssertion {
        user_id: credential.user_id,
    })
}
