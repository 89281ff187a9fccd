#![allow(dead_code)] // OpenAPI doc stubs are only referenced by utoipa macros.

use crate::{
    error::ErrorResponse,
    handlers::ws::HealthResponse,
    models::{
        session::{
            SessionIssuedResponse, SessionStateResponse, SuccessResponse,
            TwoFactorChallengeResponse,
        },
        two_factor::{
            BackupCodesResponse, TwoFactorCodeRequest, TwoFactorDisableRequest,
            TwoFactorSetupResponse, TwoFactorStatusResponse,
        },
        user::{ChangePasswordRequest, LoginRequest, UserResponse, UserRole},
    },
};
use utoipa::{
    openapi::security::{ApiKey, ApiKeyValue, SecurityScheme},
    Modify, OpenApi,
};

#[derive(OpenApi)]
#[openapi(
    paths(
        login_doc,
        verify_two_factor_doc,
        session_doc,
        logout_doc,
        change_password_doc,
        two_factor_setup_doc,
        two_factor_enable_doc,
        two_factor_disable_doc,
        two_factor_status_doc,
        backup_codes_doc,
        websocket_doc,
        health_doc
    ),
    components(
        schemas(
            LoginRequest,
            ChangePasswordRequest,
            UserResponse,
            UserRole,
            SessionIssuedResponse,
            TwoFactorChallengeResponse,
            SessionStateResponse,
            SuccessResponse,
            TwoFactorCodeRequest,
            TwoFactorDisableRequest,
            TwoFactorSetupResponse,
            TwoFactorStatusResponse,
            BackupCodesResponse,
            HealthResponse,
            ErrorResponse
        )
    ),
    modifiers(&SecuritySchemes),
    tags(
        (name = "Auth", description = "Login, sessions and password management"),
        (name = "TwoFactor", description = "TOTP enrollment and backup codes"),
        (name = "Realtime", description = "WebSocket rooms and service health")
    ),
    security(("SessionCookie" = []))
)]
pub struct ApiDoc;

struct SecuritySchemes;

impl Modify for SecuritySchemes {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_default();
        components.add_security_scheme(
            "SessionCookie",
            SecurityScheme::ApiKey(ApiKey::Cookie(ApiKeyValue::new("session_id"))),
        );
        components.add_security_scheme(
            "CsrfHeader",
            SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::new("x-csrf-token"))),
        );
    }
}

#[utoipa::path(
    post,
    path = "/api/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Session issued, or a second factor is required", body = SessionIssuedResponse),
        (status = 401, description = "Invalid email or password", body = ErrorResponse),
        (status = 423, description = "Account temporarily locked", body = ErrorResponse),
        (status = 429, description = "Too many attempts from this address", body = ErrorResponse)
    ),
    tag = "Auth",
    security(())
)]
fn login_doc() {}

#[utoipa::path(
    post,
    path = "/api/auth/2fa/verify",
    request_body = TwoFactorCodeRequest,
    responses(
        (status = 200, body = SessionIssuedResponse),
        (status = 400, description = "Challenge expired or missing", body = ErrorResponse),
        (status = 401, description = "Invalid code", body = ErrorResponse)
    ),
    tag = "TwoFactor",
    security(())
)]
fn verify_two_factor_doc() {}

#[utoipa::path(
    get,
    path = "/api/auth/session",
    responses((status = 200, body = SessionStateResponse)),
    tag = "Auth",
    security(())
)]
fn session_doc() {}

#[utoipa::path(
    post,
    path = "/api/auth/logout",
    responses(
        (status = 200, body = SuccessResponse),
        (status = 403, description = "CSRF token mismatch", body = ErrorResponse)
    ),
    tag = "Auth"
)]
fn logout_doc() {}

#[utoipa::path(
    put,
    path = "/api/auth/change-password",
    request_body = ChangePasswordRequest,
    responses(
        (status = 200, description = "Every other session revoked", body = SessionIssuedResponse),
        (status = 401, body = ErrorResponse)
    ),
    tag = "Auth",
    security(("SessionCookie" = [], "CsrfHeader" = []))
)]
fn change_password_doc() {}

#[utoipa::path(
    post,
    path = "/api/auth/2fa/setup",
    responses((status = 200, body = TwoFactorSetupResponse)),
    tag = "TwoFactor",
    security(("SessionCookie" = [], "CsrfHeader" = []))
)]
fn two_factor_setup_doc() {}

#[utoipa::path(
    post,
    path = "/api/auth/2fa/enable",
    request_body = TwoFactorCodeRequest,
    responses((status = 200, body = SuccessResponse), (status = 400, body = ErrorResponse)),
    tag = "TwoFactor",
    security(("SessionCookie" = [], "CsrfHeader" = []))
)]
fn two_factor_enable_doc() {}

#[utoipa::path(
    post,
    path = "/api/auth/2fa/disable",
    request_body = TwoFactorDisableRequest,
    responses((status = 200, body = SuccessResponse), (status = 401, body = ErrorResponse)),
    tag = "TwoFactor",
    security(("SessionCookie" = [], "CsrfHeader" = []))
)]
fn two_factor_disable_doc() {}

#[utoipa::path(
    get,
    path = "/api/auth/2fa/status",
    responses((status = 200, body = TwoFactorStatusResponse)),
    tag = "TwoFactor"
)]
fn two_factor_status_doc() {}

#[utoipa::path(
    post,
    path = "/api/auth/2fa/backup-codes",
    request_body = TwoFactorCodeRequest,
    responses((status = 200, body = BackupCodesResponse), (status = 400, body = ErrorResponse)),
    tag = "TwoFactor",
    security(("SessionCookie" = [], "CsrfHeader" = []))
)]
fn backup_codes_doc() {}

#[utoipa::path(
    get,
    path = "/api/ws",
    responses((status = 101, description = "Switching to the realtime room protocol")),
    tag = "Realtime",
    security((), ("SessionCookie" = []))
)]
fn websocket_doc() {}

#[utoipa::path(
    get,
    path = "/api/health",
    responses((status = 200, body = HealthResponse)),
    tag = "Realtime",
    security(())
)]
fn health_doc() {}
