//! Double-submit CSRF tokens bound to a session.

use crate::error::AuthError;
use crate::utils::security::{constant_time_eq, generate_secure_token};

pub struct CsrfGuard;

impl CsrfGuard {
    pub fn mint() -> String {
        generate_secure_token()
    }

    /// Accepts a request only when the token bound to the session, the
    /// readable cookie and the request header are all present and equal.
    pub fn verify(
        bound: &str,
        cookie: Option<&str>,
        header: Option<&str>,
    ) -> Result<(), AuthError> {
        let (Some(cookie), Some(header)) = (cookie, header) else {
            return Err(AuthError::CsrfMismatch);
        };
        if bound.is_empty() {
            return Err(AuthError::CsrfMismatch);
        }
        // Both comparisons always run.
        let cookie_ok = constant_time_eq(bound, cookie);
        let header_ok = constant_time_eq(bound, header);
        if cookie_ok & header_ok {
            Ok(())
        } else {
            Err(AuthError::CsrfMismatch)
        }
    }
}
