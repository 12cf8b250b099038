//! Second-factor management: TOTP, WebAuthn credentials, recovery codes.

use std::sync::Arc;

use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use base64::Engine;
use sqlx::PgPool;

use super::session::require_auth;
use crate::account;
use crate::api::state::AuthState;
use crate::api::types::{
    CredentialDeleteRequest, RecoveryCodeRequest, RecoveryCodeResponse, TotpRegisterRequest,
    TotpVerifyRequest, WebAuthnCredentialRequest,
};
use crate::error::{Error, Result};
use crate::webauthn::CredentialKind;

fn decode_field(value: &str, what: &'static str) -> Result<Vec<u8>> {
    base64::engine::general_purpose::STANDARD
        .decode(value.as_bytes())
        .map_err(|_| Error::Validation(what))
}

#[utoipa::path(
    post,
    path = "/v1/mfa/totp",
    request_body = TotpRegisterRequest,
    responses(
        (status = 204, description = "TOTP credential stored; session verified."),
        (status = 400, description = "Bad key length or undecodable key."),
        (status = 401, description = "Wrong code, missing session, or insufficient 2FA state."),
        (status = 429, description = "Too many attempts."),
    ),
    tag = "mfa"
)]
pub async fn register_totp(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    state: Extension<Arc<AuthState>>,
    Json(payload): Json<TotpRegisterRequest>,
) -> Result<impl IntoResponse> {
    let (session, user) = require_auth(&headers, &pool, &state).await?;
    let key = decode_field(&payload.key, "key must be base64")?;
    account::register_totp(
        &pool,
        state.rate_limiter(),
        &user,
        &session,
        &key,
        &payload.code,
    )
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/v1/mfa/totp/verify",
    request_body = TotpVerifyRequest,
    responses(
        (status = 204, description = "Session promoted to two-factor verified."),
        (status = 401, description = "Wrong code or no TOTP credential."),
        (status = 429, description = "Too many attempts."),
    ),
    tag = "mfa"
)]
pub async fn verify_totp(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    state: Extension<Arc<AuthState>>,
    Json(payload): Json<TotpVerifyRequest>,
) -> Result<impl IntoResponse> {
    let (session, user) = require_auth(&headers, &pool, &state).await?;
    account::verify_totp_code(&pool, state.rate_limiter(), &user, &session, &payload.code).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    delete,
    path = "/v1/mfa/totp",
    responses(
        (status = 204, description = "TOTP credential removed."),
        (status = 401, description = "Session not two-factor verified."),
        (status = 429, description = "Too many attempts."),
    ),
    tag = "mfa"
)]
pub async fn delete_totp(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    state: Extension<Arc<AuthState>>,
) -> Result<impl IntoResponse> {
    let (session, user) = require_auth(&headers, &pool, &state).await?;
    account::remove_totp(&pool, state.rate_limiter(), &user, &session).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn register_credential(
    headers: HeaderMap,
    pool: &PgPool,
    state: &AuthState,
    kind: CredentialKind,
    payload: WebAuthnCredentialRequest,
) -> Result<impl IntoResponse> {
    let (session, user) = require_auth(&headers, pool, state).await?;
    let credential_id = decode_field(&payload.credential_id, "credential_id must be base64")?;
    let public_key = decode_field(&payload.public_key, "public_key must be base64")?;
    account::register_webauthn_credential(
        pool,
        &user,
        &session,
        kind,
        &credential_id,
        &payload.name,
        payload.algorithm,
        &public_key,
    )
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_credential(
    headers: HeaderMap,
    pool: &PgPool,
    state: &AuthState,
    kind: CredentialKind,
    payload: CredentialDeleteRequest,
) -> Result<impl IntoResponse> {
    let (session, user) = require_auth(&headers, pool, state).await?;
    let credential_id = decode_field(&payload.credential_id, "credential_id must be base64")?;
    account::remove_webauthn_credential(pool, &user, &session, kind, &credential_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/v1/mfa/passkeys",
    request_body = WebAuthnCredentialRequest,
    responses(
        (status = 204, description = "Passkey stored; session verified."),
        (status = 400, description = "Unsupported algorithm or unparseable key."),
        (status = 401, description = "Missing session or insufficient 2FA state."),
    ),
    tag = "mfa"
)]
pub async fn register_passkey(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    state: Extension<Arc<AuthState>>,
    Json(payload): Json<WebAuthnCredentialRequest>,
) -> Result<impl IntoResponse> {
    register_credential(headers, &pool, &state, CredentialKind::Passkey, payload).await
}

#[utoipa::path(
    delete,
    path = "/v1/mfa/passkeys",
    request_body = CredentialDeleteRequest,
    responses(
        (status = 204, description = "Passkey removed."),
        (status = 401, description = "Unknown credential or session not verified."),
    ),
    tag = "mfa"
)]
pub async fn delete_passkey(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    state: Extension<Arc<AuthState>>,
    Json(payload): Json<CredentialDeleteRequest>,
) -> Result<impl IntoResponse> {
    delete_credential(headers, &pool, &state, CredentialKind::Passkey, payload).await
}

#[utoipa::path(
    post,
    path = "/v1/mfa/security-keys",
    request_body = WebAuthnCredentialRequest,
    responses(
        (status = 204, description = "Security key stored; session verified."),
        (status = 400, description = "Unsupported algorithm or unparseable key."),
        (status = 401, description = "Missing session or insufficient 2FA state."),
    ),
    tag = "mfa"
)]
pub async fn register_security_key(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    state: Extension<Arc<AuthState>>,
    Json(payload): Json<WebAuthnCredentialRequest>,
) -> Result<impl IntoResponse> {
    register_credential(headers, &pool, &state, CredentialKind::SecurityKey, payload).await
}

#[utoipa::path(
    delete,
    path = "/v1/mfa/security-keys",
    request_body = CredentialDeleteRequest,
    responses(
        (status = 204, description = "Security key removed."),
        (status = 401, description = "Unknown credential or session not verified."),
    ),
    tag = "mfa"
)]
pub async fn delete_security_key(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    state: Extension<Arc<AuthState>>,
    Json(payload): Json<CredentialDeleteRequest>,
) -> Result<impl IntoResponse> {
    delete_credential(headers, &pool, &state, CredentialKind::SecurityKey, payload).await
}

#[utoipa::path(
    post,
    path = "/v1/mfa/recovery-code/verify",
    request_body = RecoveryCodeRequest,
    responses(
        (status = 204, description = "Code consumed; all second factors removed."),
        (status = 401, description = "Wrong or already-consumed code."),
        (status = 429, description = "Too many attempts."),
    ),
    tag = "mfa"
)]
pub async fn verify_recovery_code(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    state: Extension<Arc<AuthState>>,
    Json(payload): Json<RecoveryCodeRequest>,
) -> Result<impl IntoResponse> {
    let (_session, user) = require_auth(&headers, &pool, &state).await?;
    account::redeem_recovery_code(&pool, state.rate_limiter(), &user, &payload.code).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/v1/mfa/recovery-code",
    responses(
        (status = 200, description = "Current recovery code.", body = RecoveryCodeResponse),
        (status = 401, description = "Session not two-factor verified."),
    ),
    tag = "mfa"
)]
pub async fn get_recovery_code(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    state: Extension<Arc<AuthState>>,
) -> Result<impl IntoResponse> {
    let (session, user) = require_auth(&headers, &pool, &state).await?;
    let recovery_code = account::current_recovery_code(&pool, &user, &session).await?;
    Ok((StatusCode::OK, Json(RecoveryCodeResponse { recovery_code })))
}

#[utoipa::path(
    post,
    path = "/v1/mfa/recovery-code/rotate",
    responses(
        (status = 200, description = "Fresh recovery code issued.", body = RecoveryCodeResponse),
        (status = 401, description = "Session not two-factor verified."),
    ),
    tag = "mfa"
)]
pub async fn rotate_recovery_code(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    state: Extension<Arc<AuthState>>,
) -> Result<impl IntoResponse> {
    let (session, user) = require_auth(&headers, &pool, &state).await?;
    let recovery_code = account::regenerate_recovery_code(&pool, &user, &session).await?;
    Ok((StatusCode::OK, Json(RecoveryCodeResponse { recovery_code })))
}
