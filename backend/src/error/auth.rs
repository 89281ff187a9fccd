use thiserror::Error;

use super::AppError;

/// Failures produced by the authentication services. Each maps onto exactly
/// one HTTP error shape.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("too many login attempts, retry in {retry_after}s")]
    RateLimited { retry_after: u64 },
    #[error("account locked for {minutes_remaining} more minutes")]
    AccountLocked { minutes_remaining: u64 },
    #[error("invalid credentials")]
    InvalidCredentials { attempts_remaining: Option<u32> },
    #[error("invalid two-factor code")]
    InvalidTwoFactorCode { attempts_remaining: u32 },
    #[error("two-factor session expired")]
    TwoFactorSessionExpired,
    #[error("no pending two-factor setup")]
    TwoFactorSetupMissing,
    #[error("setup confirmation code rejected")]
    SetupCodeRejected,
    #[error("two-factor authentication is already enabled")]
    TwoFactorAlreadyEnabled,
    #[error("two-factor authentication is not enabled")]
    TwoFactorNotEnabled,
    #[error("csrf token mismatch")]
    CsrfMismatch,
    #[error("authentication required")]
    Unauthenticated,
    #[error("password confirmation failed")]
    PasswordConfirmationFailed,
    #[error("password must be at least {min} characters")]
    WeakPassword { min: usize },
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::RateLimited { retry_after } => AppError::RateLimited { retry_after },
            AuthError::AccountLocked { minutes_remaining } => {
                AppError::AccountLocked { minutes_remaining }
            }
            AuthError::InvalidCredentials { attempts_remaining } => {
                AppError::InvalidCredentials { attempts_remaining }
            }
            AuthError::InvalidTwoFactorCode { attempts_remaining } => {
                AppError::InvalidTwoFactorCode { attempts_remaining }
            }
            AuthError::TwoFactorSessionExpired => AppError::TwoFactorSessionExpired,
            AuthError::TwoFactorSetupMissing => {
                AppError::BadRequest("Two-factor setup has not been started".into())
            }
            AuthError::SetupCodeRejected => {
                AppError::BadRequest("Invalid verification code".into())
            }
            AuthError::TwoFactorAlreadyEnabled => {
                AppError::BadRequest("Two-factor authentication is already enabled".into())
            }
            AuthError::TwoFactorNotEnabled => {
                AppError::BadRequest("Two-factor authentication is not enabled".into())
            }
            AuthError::CsrfMismatch => AppError::CsrfMismatch,
            AuthError::Unauthenticated => AppError::Unauthorized("Authentication required".into()),
            AuthError::PasswordConfirmationFailed => {
                AppError::Unauthorized("Password is incorrect".into())
            }
            AuthError::WeakPassword { min } => AppError::Validation(vec![format!(
                "newPassword: must be at least {} characters",
                min
            )]),
            AuthError::Internal(err) => AppError::InternalServerError(err),
        }
    }
}
