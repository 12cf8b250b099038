//! Request and response bodies for the HTTP surface.
//!
//! Binary fields (credential ids, keys, signatures) travel base64-encoded;
//! decoding failures are validation errors at the handler boundary.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct AssertionLoginRequest {
    pub authenticator_data: String,
    pub client_data_json: String,
    pub credential_id: String,
    pub signature: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SessionResponse {
    pub user_id: i64,
    pub username: String,
    pub two_factor_verified: bool,
    pub expires_at: String,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct TotpRegisterRequest {
    /// 20-byte TOTP secret, base64-encoded.
    pub key: String,
    /// 6-digit code computed from that secret, proving possession.
    pub code: String,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct TotpVerifyRequest {
    pub code: String,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct WebAuthnCredentialRequest {
    /// Authenticator-issued credential id, base64-encoded.
    pub credential_id: String,
    pub name: String,
    /// COSE algorithm identifier (-7 for ES256, -257 for RS256).
    pub algorithm: i32,
    /// Public key bytes, base64-encoded. SEC1 for ES256, PKCS#1 DER for RS256.
    pub public_key: String,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct CredentialDeleteRequest {
    pub credential_id: String,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct RecoveryCodeRequest {
    pub code: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RecoveryCodeResponse {
    pub recovery_code: String,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct PasswordChangeRequest {
    pub current_password: String,
    pub new_password: String,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct PasswordResetStartRequest {
    pub email: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TwoFactorGateResponse {
    /// One of `verified`, `not_registered`, or `step_required`.
    pub state: String,
    /// Set when `state` is `step_required`: `passkey`, `security_key`, or
    /// `totp`.
    pub modality: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct PasswordResetCompleteRequest {
    pub password: String,
}
