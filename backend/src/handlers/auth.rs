use std::time::Duration;

use axum::{
    extract::{Extension, State},
    http::HeaderMap,
    response::{IntoResponse, Response},
    Json,
};
use validator::Validate;

use crate::{
    error::{AppError, AuthError},
    middleware::{auth::resolve_session, csrf::verify_csrf, AuthContext, ClientIp},
    models::{
        session::{
            IssuedSession, SessionIssuedResponse, SessionStateResponse, SuccessResponse,
            TwoFactorChallengeResponse,
        },
        two_factor::TwoFactorCodeRequest,
        user::{normalize_email, ChangePasswordRequest, LoginRequest, User, UserResponse},
    },
    services::{
        login::{LoginAttempt, LoginOutcome},
        two_factor::VERIFICATION_TTL_MINUTES,
    },
    state::AppState,
    utils::cookies::{
        append_set_cookie, build_clear_cookie, build_cookie, cookie_from_headers, CookieOptions,
        Visibility, COOKIE_PATH, CSRF_COOKIE_NAME, PENDING_2FA_COOKIE_NAME,
        PENDING_2FA_COOKIE_PATH, SESSION_COOKIE_NAME,
    },
};

pub async fn login(
    State(state): State<AppState>,
    client_ip: ClientIp,
    headers: HeaderMap,
    Json(payload): Json<LoginRequest>,
) -> Result<Response, AppError> {
    payload.validate()?;
    let email = normalize_email(&payload.email);
    let existing = cookie_from_headers(&headers, SESSION_COOKIE_NAME);

    let outcome = state
        .login
        .login(LoginAttempt {
            email: &email,
            password: &payload.password,
            remember_me: payload.remember_me,
            ip: client_ip.as_deref(),
            existing_session: existing.as_deref(),
        })
        .await?;

    match outcome {
        LoginOutcome::SessionIssued { user, session } => {
            Ok(session_response(state.cookies, user, &session, None))
        }
        LoginOutcome::TwoFactorRequired { pending_token } => {
            let mut headers = HeaderMap::new();
            append_set_cookie(
                &mut headers,
                build_cookie(
                    PENDING_2FA_COOKIE_NAME,
                    &pending_token,
                    Duration::from_secs(VERIFICATION_TTL_MINUTES as u64 * 60),
                    PENDING_2FA_COOKIE_PATH,
                    Visibility::HttpOnly,
                    state.cookies,
                ),
            );
            let body = TwoFactorChallengeResponse {
                success: true,
                requires_2fa: true,
            };
            Ok((headers, Json(body)).into_response())
        }
    }
}

pub async fn verify_two_factor(
    State(state): State<AppState>,
    client_ip: ClientIp,
    headers: HeaderMap,
    Json(payload): Json<TwoFactorCodeRequest>,
) -> Result<Response, AppError> {
    let pending = cookie_from_headers(&headers, PENDING_2FA_COOKIE_NAME)
        .ok_or(AuthError::TwoFactorSessionExpired)?;
    let existing = cookie_from_headers(&headers, SESSION_COOKIE_NAME);

    let result = state
        .login
        .complete_two_factor(
            &pending,
            payload.code.trim(),
            existing.as_deref(),
            client_ip.as_deref(),
        )
        .await;

    match result {
        Ok(login) => Ok(session_response(
            state.cookies,
            login.user,
            &login.session,
            login.verification.backup_codes_remaining,
        )),
        Err(err) => {
            let challenge_gone = matches!(
                err,
                AuthError::TwoFactorSessionExpired
                    | AuthError::InvalidTwoFactorCode {
                        attempts_remaining: 0
                    }
            );
            let mut headers = HeaderMap::new();
            if challenge_gone {
                append_set_cookie(&mut headers, clear_pending_cookie(state.cookies));
            }
            Ok((headers, AppError::from(err)).into_response())
        }
    }
}

pub async fn session(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    match resolve_session(&state, &headers).await? {
        Some(context) => Ok(Json(SessionStateResponse {
            user: Some(UserResponse::from(context.user)),
            csrf_token: Some(context.session.csrf_token),
        })
        .into_response()),
        None => {
            let mut response_headers = HeaderMap::new();
            // A cookie naming a dead session is cleared so the browser stops sending it.
            if cookie_from_headers(&headers, SESSION_COOKIE_NAME).is_some() {
                response_headers = clear_session_cookies(state.cookies);
            }
            let body = SessionStateResponse {
                user: None,
                csrf_token: None,
            };
            Ok((response_headers, Json(body)).into_response())
        }
    }
}

pub async fn logout(
    State(state): State<AppState>,
    client_ip: ClientIp,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    if let Some(context) = resolve_session(&state, &headers).await? {
        verify_csrf(&context.session.csrf_token, &headers)?;
        state
            .login
            .logout(Some(&context.token), Some(&context.user), client_ip.as_deref())
            .await?;
    }

    let headers = clear_session_cookies(state.cookies);
    Ok((headers, Json(SuccessResponse::ok())).into_response())
}

pub async fn change_password(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    client_ip: ClientIp,
    Json(payload): Json<ChangePasswordRequest>,
) -> Result<Response, AppError> {
    let session = state
        .login
        .change_password(
            &context.user,
            &payload.current_password,
            &payload.new_password,
            context.session.remember_me,
            client_ip.as_deref(),
        )
        .await?;
    Ok(session_response(state.cookies, context.user, &session, None))
}

fn session_response(
    options: CookieOptions,
    user: User,
    session: &IssuedSession,
    backup_codes_remaining: Option<usize>,
) -> Response {
    let max_age = session.max_age();
    let mut headers = HeaderMap::new();
    append_set_cookie(
        &mut headers,
        build_cookie(
            SESSION_COOKIE_NAME,
            &session.token,
            max_age,
            COOKIE_PATH,
            Visibility::HttpOnly,
            options,
        ),
    );
    append_set_cookie(
        &mut headers,
        build_cookie(
            CSRF_COOKIE_NAME,
            session.csrf_token(),
            max_age,
            COOKIE_PATH,
            Visibility::Readable,
            options,
        ),
    );
    append_set_cookie(&mut headers, clear_pending_cookie(options));

    let body = SessionIssuedResponse {
        success: true,
        user: UserResponse::from(user),
        csrf_token: session.csrf_token().to_string(),
        backup_codes_remaining,
    };
    (headers, Json(body)).into_response()
}

fn clear_session_cookies(options: CookieOptions) -> HeaderMap {
    let mut headers = HeaderMap::new();
    append_set_cookie(
        &mut headers,
        build_clear_cookie(SESSION_COOKIE_NAME, COOKIE_PATH, Visibility::HttpOnly, options),
    );
    append_set_cookie(
        &mut headers,
        build_clear_cookie(CSRF_COOKIE_NAME, COOKIE_PATH, Visibility::Readable, options),
    );
    headers
}

fn clear_pending_cookie(options: CookieOptions) -> String {
    build_clear_cookie(
        PENDING_2FA_COOKIE_NAME,
        PENDING_2FA_COOKIE_PATH,
        Visibility::HttpOnly,
        options,
    )
}
