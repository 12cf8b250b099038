//! Error taxonomy for authentication and credential operations.
//!
//! Every failure a caller can observe is classified here so handlers can map
//! it to a status code and a reason without leaking internals. Store faults
//! and unsupported credential algorithms are server-side conditions and are
//! surfaced as generic failures to the client.

use axum::{http::StatusCode, response::IntoResponse};
use thiserror::Error;
use tracing::error;

/// Reason codes for authentication rejections.
///
/// These are user-visible and intentionally coarse: enough to drive UI copy,
/// not enough to help an attacker distinguish account state.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Denial {
    /// Wrong TOTP code for the accepted windows.
    InvalidCode,
    /// Assertion signature did not verify against the stored public key.
    InvalidSignature,
    /// No credential stored under the presented credential id.
    UnknownCredential,
    /// Challenge was never issued, already consumed, expired, or the client
    /// data origin did not match.
    ChallengeRejected,
    /// Recovery code did not match the current stored value.
    InvalidRecoveryCode,
    /// Current password did not verify against the stored hash.
    InvalidPassword,
    /// Supplied email no longer matches the account email.
    EmailMismatch,
}

impl Denial {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidCode => "invalid_code",
            Self::InvalidSignature => "invalid_signature",
            Self::UnknownCredential => "unknown_credential",
            Self::ChallengeRejected => "challenge_rejected",
            Self::InvalidRecoveryCode => "invalid_recovery_code",
            Self::InvalidPassword => "invalid_password",
            Self::EmailMismatch => "email_mismatch",
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    /// Malformed or missing fields; the caller can retry with corrected input.
    #[error("invalid request: {0}")]
    Validation(&'static str),

    /// Wrong credential material; not retryable without new material.
    #[error("authentication failed: {}", .0.as_str())]
    Authentication(Denial),

    /// Missing session, insufficient two-factor state, or unverified email.
    #[error("not authorized")]
    Authorization,

    /// Too many attempts against a per-account bucket.
    #[error("too many requests")]
    RateLimited,

    /// A credential was registered with an algorithm this build cannot
    /// verify. Server-side defect, never a user error.
    #[error("unsupported credential algorithm {0}")]
    UnsupportedCredential(i32),

    /// Storage or transaction fault. Always triggers rollback upstream.
    #[error("storage error: {0}")]
    Store(#[from] sqlx::Error),

    /// Infrastructure fault (hashing, token generation).
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl Error {
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Authentication(_) | Self::Authorization => StatusCode::UNAUTHORIZED,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::UnsupportedCredential(_) | Self::Store(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Body shown to the client. Server faults collapse to a generic string.
    #[must_use]
    pub fn public_reason(&self) -> &'static str {
        match self {
            Self::Validation(reason) => reason,
            Self::Authentication(denial) => denial.as_str(),
            Self::Authorization => "unauthorized",
            Self::RateLimited => "rate_limited",
            Self::UnsupportedCredential(_) | Self::Store(_) | Self::Internal(_) => {
                "internal_error"
            }
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!("request failed: {self}");
        }
        (status, self.public_reason()).into_response()
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::{Denial, Error};
    use axum::http::StatusCode;

    #[test]
    fn status_codes_follow_taxonomy() {
        assert_eq!(
            Error::Validation("bad key").status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            Error::Authentication(Denial::InvalidCode).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(Error::Authorization.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            Error::RateLimited.status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            Error::UnsupportedCredential(-8).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn server_faults_do_not_leak_reasons() {
        let err = Error::Store(sqlx::Error::RowNotFound);
        assert_eq!(err.public_reason(), "internal_error");
        let err = Error::UnsupportedCredential(-35);
        assert_eq!(err.public_reason(), "internal_error");
    }

    #[test]
    fn denial_reason_codes_are_distinct() {
        let reasons = [
            Denial::InvalidCode,
            Denial::InvalidSignature,
            Denial::UnknownCredential,
            Denial::ChallengeRejected,
            Denial::InvalidRecoveryCode,
            Denial::InvalidPassword,
            Denial::EmailMismatch,
        ];
        for (i, a) in reasons.iter().enumerate() {
            for b in reasons.iter().skip(i + 1) {
                assert_ne!(a.as_str(), b.as_str());
            }
        }
    }
}
