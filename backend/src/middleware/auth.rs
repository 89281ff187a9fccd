use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};

use crate::{
    error::{AppError, AuthError},
    models::{session::SessionRecord, user::User},
    state::AppState,
    utils::cookies::{cookie_from_headers, SESSION_COOKIE_NAME},
};

/// The caller behind a valid session cookie, inserted as a request extension
/// by [`require_auth`].
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user: User,
    pub session: SessionRecord,
    /// Raw session identifier as presented in the cookie.
    pub token: String,
}

pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let context = resolve_session(&state, request.headers())
        .await?
        .ok_or(AuthError::Unauthenticated)?;
    request.extensions_mut().insert(context.user.clone());
    request.extensions_mut().insert(context);
    Ok(next.run(request).await)
}

/// Looks up the session named by the request cookie. Missing, expired and
/// dangling sessions all resolve to `None`.
pub async fn resolve_session(
    state: &AppState,
    headers: &HeaderMap,
) -> anyhow::Result<Option<AuthContext>> {
    let Some(token) = cookie_from_headers(headers, SESSION_COOKIE_NAME) else {
        return Ok(None);
    };
    let context = state
        .sessions
        .validate(&token)
        .await?
        .map(|(session, user)| AuthContext {
            user,
            session,
            token,
        });
    Ok(context)
}
