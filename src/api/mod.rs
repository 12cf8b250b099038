//! HTTP glue: routing, shared state, and request/response types.
//!
//! Handlers stay thin. Every gating, rate-limiting, and cascade rule lives in
//! [`crate::account`] and the store; this layer only resolves cookies, decodes
//! base64 fields, and maps errors to status codes.

use std::sync::Arc;

use axum::{extract::MatchedPath, http::Request, Extension};
use sqlx::PgPool;
use tower_http::trace::TraceLayer;
use tracing::info_span;

pub(crate) mod handlers;
mod openapi;
pub mod state;
pub mod types;

pub use openapi::openapi;
pub use state::AuthState;

/// Build the application router with the pool and auth state attached.
#[must_use]
pub fn router(pool: PgPool, auth_state: Arc<AuthState>) -> axum::Router {
    let (router, _openapi) = openapi::api_router().split_for_parts();
    router
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &Request<_>| {
                let path = request
                    .extensions()
                    .get::<MatchedPath>()
                    .map_or_else(|| request.uri().path(), MatchedPath::as_str);
                info_span!(
                    "http.request",
                    http.method = %request.method(),
                    http.route = path,
                )
            }),
        )
        .layer(Extension(pool))
        .layer(Extension(auth_state))
}
