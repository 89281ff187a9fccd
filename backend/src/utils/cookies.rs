use std::time::Duration;

use axum::http::{header, HeaderMap, HeaderValue};

use crate::config::Config;

/// Every cookie is `SameSite=Strict`: the session cookie alone authorizes
/// the WebSocket upgrade, which has no CSRF header to fall back on.
#[derive(Debug, Clone, Copy)]
pub struct CookieOptions {
    pub secure: bool,
}

impl CookieOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            secure: config.cookie_secure,
        }
    }
}

pub const SESSION_COOKIE_NAME: &str = "session_id";
pub const CSRF_COOKIE_NAME: &str = "csrf_token";
pub const PENDING_2FA_COOKIE_NAME: &str = "pending_2fa";
pub const CSRF_HEADER_NAME: &str = "x-csrf-token";
pub const COOKIE_PATH: &str = "/";
pub const PENDING_2FA_COOKIE_PATH: &str = "/api/auth/2fa";

/// Whether browser scripts may read the cookie. Only the CSRF token is
/// readable; it has to be echoed back in a request header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    HttpOnly,
    Readable,
}

pub fn build_cookie(
    name: &str,
    value: &str,
    max_age: Duration,
    path: &str,
    visibility: Visibility,
    options: CookieOptions,
) -> String {
    let mut cookie = format!(
        "{}={}; Path={}; Max-Age={}; SameSite=Strict",
        name,
        value,
        path,
        max_age.as_secs()
    );
    if visibility == Visibility::HttpOnly {
        cookie.push_str("; HttpOnly");
    }
    if options.secure {
        cookie.push_str("; Secure");
    }
    cookie
}

pub fn build_clear_cookie(
    name: &str,
    path: &str,
    visibility: Visibility,
    options: CookieOptions,
) -> String {
    build_cookie(name, "", Duration::ZERO, path, visibility, options)
}

/// Appends a `Set-Cookie` header; values that are not valid header text are
/// dropped with a warning.
pub fn append_set_cookie(headers: &mut HeaderMap, cookie: String) {
    match HeaderValue::from_str(&cookie) {
        Ok(value) => {
            headers.append(header::SET_COOKIE, value);
        }
        Err(err) => tracing::warn!(error = %err, "Dropping malformed Set-Cookie value"),
    }
}

pub fn extract_cookie_value(header: &str, name: &str) -> Option<String> {
    header.split(';').map(str::trim).find_map(|pair| {
        let mut parts = pair.splitn(2, '=');
        let key = parts.next()?.trim();
        let value = parts.next()?.trim();
        if key == name && !value.is_empty() {
            Some(value.to_string())
        } else {
            None
        }
    })
}

/// Reads a cookie from every `Cookie` header on the request.
pub fn cookie_from_headers(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .find_map(|raw| extract_cookie_value(raw, name))
}
