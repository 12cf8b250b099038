//! Session cookie plumbing and the session endpoints.

use std::sync::Arc;

use axum::{
    extract::Extension,
    http::{
        header::{InvalidHeaderValue, AUTHORIZATION, COOKIE, SET_COOKIE},
        HeaderMap, HeaderValue, StatusCode,
    },
    response::IntoResponse,
    Json,
};
use sqlx::PgPool;
use tracing::error;

use crate::account;
use crate::api::state::AuthState;
use crate::api::types::SessionResponse;
use crate::config::AuthConfig;
use crate::error::{Error, Result};
use crate::store::reset::{validate_reset_session, ResetSessionRecord};
use crate::store::sessions::{validate_and_refresh, SessionRecord};
use crate::store::users::UserRecord;

pub(crate) const SESSION_COOKIE_NAME: &str = "custode_session";
pub(crate) const RESET_COOKIE_NAME: &str = "custode_reset_session";

/// Pull a named cookie value out of the request headers.
fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    let cookies = headers.get(COOKIE)?.to_str().ok()?;
    cookies.split(';').find_map(|pair| {
        let (key, value) = pair.trim().split_once('=')?;
        (key == name).then(|| value.to_string())
    })
}

/// Session token from the cookie, falling back to a bearer header.
pub(crate) fn extract_session_token(headers: &HeaderMap) -> Option<String> {
    if let Some(token) = cookie_value(headers, SESSION_COOKIE_NAME) {
        return Some(token);
    }
    let bearer = headers.get(AUTHORIZATION)?.to_str().ok()?;
    bearer
        .strip_prefix("Bearer ")
        .map(|token| token.trim().to_string())
}

/// Resolve the acting session and its user, or deny.
pub(crate) async fn require_auth(
    headers: &HeaderMap,
    pool: &PgPool,
    state: &AuthState,
) -> Result<(SessionRecord, UserRecord)> {
    let token = extract_session_token(headers).ok_or(Error::Authorization)?;
    validate_and_refresh(pool, &token, state.config().session_ttl_seconds())
        .await?
        .ok_or(Error::Authorization)
}

/// Resolve the reset-flow session and its user, or deny.
pub(crate) async fn require_reset_auth(
    headers: &HeaderMap,
    pool: &PgPool,
) -> Result<(ResetSessionRecord, UserRecord)> {
    let token = cookie_value(headers, RESET_COOKIE_NAME).ok_or(Error::Authorization)?;
    validate_reset_session(pool, &token)
        .await?
        .ok_or(Error::Authorization)
}

fn build_cookie(
    name: &str,
    token: &str,
    max_age: i64,
    secure: bool,
) -> std::result::Result<HeaderValue, InvalidHeaderValue> {
    let mut cookie = format!("{name}={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={max_age}");
    if secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

/// `Set-Cookie` header carrying a new session token.
pub(crate) fn session_cookie(config: &AuthConfig, token: &str) -> Result<HeaderValue> {
    build_cookie(
        SESSION_COOKIE_NAME,
        token,
        config.session_ttl_seconds(),
        config.session_cookie_secure(),
    )
    .map_err(|err| Error::Internal(anyhow::anyhow!("invalid session cookie: {err}")))
}

pub(crate) fn clear_session_cookie(config: &AuthConfig) -> Result<HeaderValue> {
    build_cookie(SESSION_COOKIE_NAME, "", 0, config.session_cookie_secure())
        .map_err(|err| Error::Internal(anyhow::anyhow!("invalid session cookie: {err}")))
}

/// `Set-Cookie` header carrying a reset session token.
pub(crate) fn reset_cookie(config: &AuthConfig, token: &str) -> Result<HeaderValue> {
    build_cookie(
        RESET_COOKIE_NAME,
        token,
        config.reset_session_ttl_seconds(),
        config.session_cookie_secure(),
    )
    .map_err(|err| Error::Internal(anyhow::anyhow!("invalid reset cookie: {err}")))
}

pub(crate) fn clear_reset_cookie(config: &AuthConfig) -> Result<HeaderValue> {
    build_cookie(RESET_COOKIE_NAME, "", 0, config.session_cookie_secure())
        .map_err(|err| Error::Internal(anyhow::anyhow!("invalid reset cookie: {err}")))
}

#[utoipa::path(
    get,
    path = "/v1/auth/session",
    responses(
        (status = 200, description = "Session is active.", body = SessionResponse),
        (status = 204, description = "No active session.")
    ),
    tag = "auth"
)]
pub async fn session(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    state: Extension<Arc<AuthState>>,
) -> Result<axum::response::Response> {
    // Missing cookies are "no session", not an error.
    let Some(token) = extract_session_token(&headers) else {
        return Ok(StatusCode::NO_CONTENT.into_response());
    };
    let resolved = validate_and_refresh(&pool, &token, state.config().session_ttl_seconds()).await?;
    let Some((session, user)) = resolved else {
        return Ok(StatusCode::NO_CONTENT.into_response());
    };
    let response = SessionResponse {
        user_id: user.id,
        username: user.username,
        two_factor_verified: session.two_factor_verified,
        expires_at: session.expires_at.to_rfc3339(),
    };
    Ok((StatusCode::OK, Json(response)).into_response())
}

#[utoipa::path(
    post,
    path = "/v1/auth/logout",
    responses(
        (status = 204, description = "Session cleared.")
    ),
    tag = "auth"
)]
pub async fn logout(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    state: Extension<Arc<AuthState>>,
) -> Result<impl IntoResponse> {
    if let Ok((session, _user)) = require_auth(&headers, &pool, &state).await {
        if let Err(err) = account::logout(&pool, &session).await {
            error!("failed to delete session: {err}");
        }
    }

    // Always clear the cookie, even when the record was already gone.
    let mut response_headers = HeaderMap::new();
    response_headers.insert(SET_COOKIE, clear_session_cookie(state.config())?);
    Ok((StatusCode::NO_CONTENT, response_headers))
}

#[cfg(test)]
mod tests {
    use super::{cookie_value, extract_session_token, SESSION_COOKIE_NAME};
    use axum::http::{header::AUTHORIZATION, header::COOKIE, HeaderMap, HeaderValue};

    #[test]
    fn reads_token_from_cookie_header() {
        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            HeaderValue::from_static("other=1; custode_session=abc123; more=2"),
        );
        assert_eq!(extract_session_token(&headers).as_deref(), Some("abc123"));
    }

    #[test]
    fn falls_back_to_bearer_header() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer tok"));
        assert_eq!(extract_session_token(&headers).as_deref(), Some("tok"));
    }

    #[test]
    fn missing_cookie_yields_none() {
        let headers = HeaderMap::new();
        assert!(cookie_value(&headers, SESSION_COOKIE_NAME).is_none());
        assert!(extract_session_token(&headers).is_none());
    }
}
