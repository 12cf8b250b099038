//! Password change and the email-verified reset flow.

use std::sync::Arc;

use axum::{
    extract::Extension,
    http::{header::SET_COOKIE, HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use sqlx::PgPool;

use super::session::{
    clear_reset_cookie, require_auth, require_reset_auth, reset_cookie, session_cookie,
};
use crate::account;
use crate::api::state::AuthState;
use crate::api::types::{
    AssertionLoginRequest, PasswordChangeRequest, PasswordResetCompleteRequest,
    PasswordResetStartRequest, TotpVerifyRequest, TwoFactorGateResponse,
};
use crate::error::Result;
use crate::store::reset::{SecondFactor, TwoFactorGate};
use crate::webauthn::{AssertionRequest, CredentialKind};

#[utoipa::path(
    post,
    path = "/v1/account/password",
    request_body = PasswordChangeRequest,
    responses(
        (status = 204, description = "Password changed; other sessions revoked."),
        (status = 400, description = "New password out of bounds."),
        (status = 401, description = "Wrong current password or missing session."),
        (status = 429, description = "Too many attempts."),
    ),
    tag = "account"
)]
pub async fn change_password(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    state: Extension<Arc<AuthState>>,
    Json(payload): Json<PasswordChangeRequest>,
) -> Result<impl IntoResponse> {
    let (session, user) = require_auth(&headers, &pool, &state).await?;
    account::change_password(
        &pool,
        state.rate_limiter(),
        &user,
        &session,
        &payload.current_password,
        &payload.new_password,
    )
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/v1/account/password-reset",
    request_body = PasswordResetStartRequest,
    responses(
        (status = 204, description = "If the address is known and verified, a reset session was opened."),
    ),
    tag = "account"
)]
pub async fn start_reset(
    pool: Extension<PgPool>,
    state: Extension<Arc<AuthState>>,
    Json(payload): Json<PasswordResetStartRequest>,
) -> Result<impl IntoResponse> {
    let mut headers = HeaderMap::new();
    // Unknown addresses get the same 204 with no cookie, so the endpoint
    // cannot be used to enumerate accounts.
    if let Some(token) = account::start_password_reset(&pool, state.config(), &payload.email).await?
    {
        headers.insert(SET_COOKIE, reset_cookie(state.config(), &token)?);
    }
    Ok((StatusCode::NO_CONTENT, headers))
}

fn gate_response(gate: TwoFactorGate) -> TwoFactorGateResponse {
    match gate {
        TwoFactorGate::AlreadyVerified => TwoFactorGateResponse {
            state: "verified".to_string(),
            modality: None,
        },
        TwoFactorGate::NotRegistered => TwoFactorGateResponse {
            state: "not_registered".to_string(),
            modality: None,
        },
        TwoFactorGate::StepRequired(factor) => TwoFactorGateResponse {
            state: "step_required".to_string(),
            modality: Some(
                match factor {
                    SecondFactor::Passkey => "passkey",
                    SecondFactor::SecurityKey => "security_key",
                    SecondFactor::Totp => "totp",
                }
                .to_string(),
            ),
        },
    }
}

#[utoipa::path(
    get,
    path = "/v1/account/password-reset/2fa",
    responses(
        (status = 200, description = "Routing decision for the second-factor step.", body = TwoFactorGateResponse),
        (status = 401, description = "No valid reset session."),
    ),
    tag = "account"
)]
pub async fn reset_gate(
    headers: HeaderMap,
    pool: Extension<PgPool>,
) -> Result<impl IntoResponse> {
    let (session, user) = require_reset_auth(&headers, &pool).await?;
    let gate = account::reset_two_factor_gate(&user, &session);
    Ok((StatusCode::OK, Json(gate_response(gate))))
}

#[utoipa::path(
    post,
    path = "/v1/account/password-reset/2fa/totp",
    request_body = TotpVerifyRequest,
    responses(
        (status = 204, description = "Reset session promoted to two-factor verified."),
        (status = 401, description = "Wrong code or no valid reset session."),
        (status = 429, description = "Too many attempts."),
    ),
    tag = "account"
)]
pub async fn reset_verify_totp(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    state: Extension<Arc<AuthState>>,
    Json(payload): Json<TotpVerifyRequest>,
) -> Result<impl IntoResponse> {
    let (session, user) = require_reset_auth(&headers, &pool).await?;
    account::verify_reset_totp(&pool, state.rate_limiter(), &user, &session, &payload.code).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn reset_verify_assertion(
    headers: HeaderMap,
    pool: &PgPool,
    state: &AuthState,
    kind: CredentialKind,
    payload: AssertionLoginRequest,
) -> Result<impl IntoResponse> {
    let (session, _user) = require_reset_auth(&headers, pool).await?;
    let request = AssertionRequest {
        authenticator_data: payload.authenticator_data,
        client_data_json: payload.client_data_json,
        credential_id: payload.credential_id,
        signature: payload.signature,
    };
    account::verify_reset_assertion(
        pool,
        state.config(),
        state.challenges(),
        kind,
        &session,
        &request,
    )
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/v1/account/password-reset/2fa/passkey",
    request_body = AssertionLoginRequest,
    responses(
        (status = 204, description = "Reset session promoted to two-factor verified."),
        (status = 401, description = "Assertion rejected or no valid reset session."),
    ),
    tag = "account"
)]
pub async fn reset_verify_passkey(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    state: Extension<Arc<AuthState>>,
    Json(payload): Json<AssertionLoginRequest>,
) -> Result<impl IntoResponse> {
    reset_verify_assertion(headers, &pool, &state, CredentialKind::Passkey, payload).await
}

#[utoipa::path(
    post,
    path = "/v1/account/password-reset/2fa/security-key",
    request_body = AssertionLoginRequest,
    responses(
        (status = 204, description = "Reset session promoted to two-factor verified."),
        (status = 401, description = "Assertion rejected or no valid reset session."),
    ),
    tag = "account"
)]
pub async fn reset_verify_security_key(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    state: Extension<Arc<AuthState>>,
    Json(payload): Json<AssertionLoginRequest>,
) -> Result<impl IntoResponse> {
    reset_verify_assertion(headers, &pool, &state, CredentialKind::SecurityKey, payload).await
}

#[utoipa::path(
    post,
    path = "/v1/account/password-reset/complete",
    request_body = PasswordResetCompleteRequest,
    responses(
        (status = 204, description = "Password replaced; logged in with a fresh session."),
        (status = 400, description = "New password out of bounds."),
        (status = 401, description = "Second factor outstanding, email changed, or no valid reset session."),
    ),
    tag = "account"
)]
pub async fn complete_reset(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    state: Extension<Arc<AuthState>>,
    Json(payload): Json<PasswordResetCompleteRequest>,
) -> Result<impl IntoResponse> {
    let (session, user) = require_reset_auth(&headers, &pool).await?;
    let established =
        account::complete_password_reset(&pool, state.config(), &user, &session, &payload.password)
            .await?;

    let mut response_headers = HeaderMap::new();
    response_headers.insert(SET_COOKIE, session_cookie(state.config(), &established.token)?);
    response_headers.append(SET_COOKIE, clear_reset_cookie(state.config())?);
    Ok((StatusCode::NO_CONTENT, response_headers))
}
