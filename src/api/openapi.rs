use super::handlers::{login, mfa, password, session};
use utoipa::openapi::{InfoBuilder, License, OpenApiBuilder, Tag};
use utoipa_axum::{router::OpenApiRouter, routes};

#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    // Reuse the router wiring and only return the generated document.
    let (_router, openapi) = api_router().split_for_parts();
    openapi
}

/// Build the router that also drives the `OpenAPI` document.
///
/// Add new endpoints here via `.routes(routes!(...))` so they are both served
/// and documented.
pub(crate) fn api_router() -> OpenApiRouter {
    // `routes!` reads #[utoipa::path] to bind HTTP method + path.
    let mut router = OpenApiRouter::with_openapi(cargo_openapi())
        .routes(routes!(session::session))
        .routes(routes!(session::logout))
        .routes(routes!(login::login_passkey))
        .routes(routes!(login::login_security_key))
        .routes(routes!(mfa::register_totp, mfa::delete_totp))
        .routes(routes!(mfa::verify_totp))
        .routes(routes!(mfa::register_passkey, mfa::delete_passkey))
        .routes(routes!(mfa::register_security_key, mfa::delete_security_key))
        .routes(routes!(mfa::get_recovery_code))
        .routes(routes!(mfa::verify_recovery_code))
        .routes(routes!(mfa::rotate_recovery_code))
        .routes(routes!(password::change_password))
        .routes(routes!(password::start_reset))
        .routes(routes!(password::reset_gate))
        .routes(routes!(password::reset_verify_totp))
        .routes(routes!(password::reset_verify_passkey))
        .routes(routes!(password::reset_verify_security_key))
        .routes(routes!(password::complete_reset));

    let mut auth_tag = Tag::new("auth");
    auth_tag.description = Some("Login, sessions, and logout".to_string());

    let mut mfa_tag = Tag::new("mfa");
    mfa_tag.description = Some("Second-factor credentials and recovery codes".to_string());

    let mut account_tag = Tag::new("account");
    account_tag.description = Some("Password change and reset".to_string());

    router.get_openapi_mut().tags = Some(vec![auth_tag, mfa_tag, account_tag]);

    router
}

fn cargo_openapi() -> utoipa::openapi::OpenApi {
    // Use Cargo.toml metadata instead of the utoipa-axum defaults.
    let mut info = InfoBuilder::new()
        .title(env!("CARGO_PKG_NAME"))
        .version(env!("CARGO_PKG_VERSION"))
        .description(optional_str(env!("CARGO_PKG_DESCRIPTION")))
        .build();

    info.license = cargo_license();

    OpenApiBuilder::new().info(info).build()
}

fn cargo_license() -> Option<License> {
    let identifier = optional_str(env!("CARGO_PKG_LICENSE"))?;
    let mut license = License::new(identifier);
    license.identifier = Some(identifier.to_string());
    Some(license)
}

fn optional_str(value: &'static str) -> Option<&'static str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

#[cfg(test)]
mod tests {
    use super::openapi;

    #[test]
    fn document_carries_cargo_metadata() {
        let doc = openapi();
        assert_eq!(doc.info.title, env!("CARGO_PKG_NAME"));
        assert_eq!(doc.info.version, env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn all_surfaces_are_documented() {
        let doc = openapi();
        let paths = &doc.paths.paths;
        for expected in [
            "/v1/auth/session",
            "/v1/auth/logout",
            "/v1/auth/login/passkey",
            "/v1/auth/login/security-key",
            "/v1/mfa/totp",
            "/v1/mfa/totp/verify",
            "/v1/mfa/passkeys",
            "/v1/mfa/security-keys",
            "/v1/mfa/recovery-code",
            "/v1/mfa/recovery-code/verify",
            "/v1/mfa/recovery-code/rotate",
            "/v1/account/password",
            "/v1/account/password-reset",
            "/v1/account/password-reset/2fa",
            "/v1/account/password-reset/2fa/totp",
            "/v1/account/password-reset/2fa/passkey",
            "/v1/account/password-reset/2fa/security-key",
            "/v1/account/password-reset/complete",
        ] {
            assert!(paths.contains_key(expected), "missing path: {expected}");
        }
    }
}
