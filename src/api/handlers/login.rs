//! Login with a passkey or security-key assertion.

use std::sync::Arc;

use axum::{
    extract::Extension,
    http::{header::SET_COOKIE, HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use sqlx::PgPool;

use super::session::session_cookie;
use crate::account;
use crate::api::state::AuthState;
use crate::api::types::AssertionLoginRequest;
use crate::error::Result;
use crate::webauthn::{AssertionRequest, CredentialKind};

async fn login(
    pool: &PgPool,
    state: &AuthState,
    kind: CredentialKind,
    payload: AssertionLoginRequest,
) -> Result<impl IntoResponse> {
    let request = AssertionRequest {
        authenticator_data: payload.authenticator_data,
        client_data_json: payload.client_data_json,
        credential_id: payload.credential_id,
        signature: payload.signature,
    };
    let established =
        account::login_with_assertion(pool, state.config(), state.challenges(), kind, &request)
            .await?;

    let mut headers = HeaderMap::new();
    headers.insert(SET_COOKIE, session_cookie(state.config(), &established.token)?);
    Ok((StatusCode::NO_CONTENT, headers))
}

#[utoipa::path(
    post,
    path = "/v1/auth/login/passkey",
    request_body = AssertionLoginRequest,
    responses(
        (status = 204, description = "Logged in; session cookie set."),
        (status = 400, description = "Malformed assertion."),
        (status = 401, description = "Assertion rejected."),
    ),
    tag = "auth"
)]
pub async fn login_passkey(
    pool: Extension<PgPool>,
    state: Extension<Arc<AuthState>>,
    Json(payload): Json<AssertionLoginRequest>,
) -> Result<impl IntoResponse> {
    login(&pool, &state, CredentialKind::Passkey, payload).await
}

#[utoipa::path(
    post,
    path = "/v1/auth/login/security-key",
    request_body = AssertionLoginRequest,
    responses(
        (status = 204, description = "Logged in; session cookie set."),
        (status = 400, description = "Malformed assertion."),
        (status = 401, description = "Assertion rejected."),
    ),
    tag = "auth"
)]
pub async fn login_security_key(
    pool: Extension<PgPool>,
    state: Extension<Arc<AuthState>>,
    Json(payload): Json<AssertionLoginRequest>,
) -> Result<impl IntoResponse> {
    login(&pool, &state, CredentialKind::SecurityKey, payload).await
}
