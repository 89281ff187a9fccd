use axum::{
    extract::Request,
    http::{HeaderMap, Method},
    middleware::Next,
    response::Response,
};

use crate::{
    error::{AppError, AuthError},
    middleware::auth::AuthContext,
    services::csrf::CsrfGuard,
    utils::cookies::{cookie_from_headers, CSRF_COOKIE_NAME, CSRF_HEADER_NAME},
};

/// Rejects state-changing requests whose CSRF cookie and header do not both
/// match the token bound to the session. Must run after `require_auth`.
pub async fn require_csrf(request: Request, next: Next) -> Result<Response, AppError> {
    if is_safe_method(request.method()) {
        return Ok(next.run(request).await);
    }
    let context = request
        .extensions()
        .get::<AuthContext>()
        .ok_or(AuthError::Unauthenticated)?;
    verify_csrf(&context.session.csrf_token, request.headers())?;
    Ok(next.run(request).await)
}

pub fn verify_csrf(bound: &str, headers: &HeaderMap) -> Result<(), AuthError> {
    let cookie = cookie_from_headers(headers, CSRF_COOKIE_NAME);
    let header = headers
        .get(CSRF_HEADER_NAME)
        .and_then(|value| value.to_str().ok());
    let result = CsrfGuard::verify(bound, cookie.as_deref(), header);
    if result.is_err() {
        tracing::warn!("Rejected request with mismatched CSRF token");
    }
    result
}

pub fn is_safe_method(method: &Method) -> bool {
    matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{header, HeaderValue};

    fn headers(cookie: Option<&str>, header_value: Option<&str>) -> HeaderMap {
        let mut map = HeaderMap::new();
        if let Some(cookie) = cookie {
            map.insert(
                header::COOKIE,
                HeaderValue::from_str(&format!("csrf_token={cookie}")).unwrap(),
            );
        }
        if let Some(value) = header_value {
            map.insert(CSRF_HEADER_NAME, HeaderValue::from_str(value).unwrap());
        }
        map
    }

    #[test]
    fn safe_methods_skip_the_check() {
        assert!(is_safe_method(&Method::GET));
        assert!(is_safe_method(&Method::OPTIONS));
        assert!(!is_safe_method(&Method::POST));
        assert!(!is_safe_method(&Method::PUT));
    }

    #[test]
    fn verify_csrf_requires_cookie_and_header() {
        assert!(verify_csrf("tok", &headers(Some("tok"), Some("tok"))).is_ok());
        assert!(verify_csrf("tok", &headers(Some("tok"), None)).is_err());
        assert!(verify_csrf("tok", &headers(None, Some("tok"))).is_err());
        assert!(verify_csrf("tok", &headers(Some("tok"), Some("other"))).is_err());
    }
}
