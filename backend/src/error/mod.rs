use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::{json, Value};
use utoipa::ToSchema;

pub mod auth;

pub use auth::AuthError;

#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub details: Option<Value>,
}

#[derive(Debug)]
pub enum AppError {
    Unauthorized(String),
    BadRequest(String),
    InternalServerError(anyhow::Error),
    Validation(Vec<String>),
    InvalidCredentials { attempts_remaining: Option<u32> },
    AccountLocked { minutes_remaining: u64 },
    RateLimited { retry_after: u64 },
    InvalidTwoFactorCode { attempts_remaining: u32 },
    TwoFactorSessionExpired,
    CsrfMismatch,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let mut retry_after = None;
        let (status, error_message, code, details) = match self {
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg, "UNAUTHORIZED", None),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg, "BAD_REQUEST", None),
            AppError::InternalServerError(err) => {
                tracing::error!("Internal server error: {:?}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                    "INTERNAL_SERVER_ERROR",
                    None,
                )
            }
            AppError::Validation(errors) => (
                StatusCode::BAD_REQUEST,
                "Validation failed".to_string(),
                "VALIDATION_ERROR",
                Some(json!({ "errors": errors })),
            ),
            AppError::InvalidCredentials { attempts_remaining } => (
                StatusCode::UNAUTHORIZED,
                "Invalid email or password".to_string(),
                "INVALID_CREDENTIALS",
                attempts_remaining.map(|remaining| json!({ "attemptsRemaining": remaining })),
            ),
            AppError::AccountLocked { minutes_remaining } => (
                StatusCode::LOCKED,
                format!(
                    "Account is temporarily locked. Try again in {} minutes",
                    minutes_remaining
                ),
                "ACCOUNT_LOCKED",
                Some(json!({ "minutesRemaining": minutes_remaining })),
            ),
            AppError::RateLimited { retry_after: secs } => {
                retry_after = Some(secs);
                (
                    StatusCode::TOO_MANY_REQUESTS,
                    "Too many login attempts. Please try again later".to_string(),
                    "RATE_LIMITED",
                    Some(json!({ "retryAfter": secs })),
                )
            }
            AppError::InvalidTwoFactorCode { attempts_remaining } => (
                StatusCode::UNAUTHORIZED,
                "Invalid verification code".to_string(),
                "INVALID_2FA_CODE",
                Some(json!({ "attemptsRemaining": attempts_remaining })),
            ),
            AppError::TwoFactorSessionExpired => (
                StatusCode::BAD_REQUEST,
                "Two-factor session expired. Please sign in again".to_string(),
                "2FA_SESSION_EXPIRED",
                None,
            ),
            AppError::CsrfMismatch => (
                StatusCode::FORBIDDEN,
                "CSRF token missing or invalid".to_string(),
                "CSRF_MISMATCH",
                None,
            ),
        };

        let body = Json(ErrorResponse {
            error: error_message,
            code: code.to_string(),
            details,
        });

        let mut response = (status, body).into_response();
        if let Some(secs) = retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::InternalServerError(err)
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let messages: Vec<String> = errors
            .field_errors()
            .into_iter()
            .flat_map(|(field, errs)| {
                errs.iter().map(move |e| {
                    let code = e.code.as_ref();
                    format!("{}: {}", field, code)
                })
            })
            .collect();
        AppError::Validation(messages)
    }
}
