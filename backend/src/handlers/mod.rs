pub mod auth;
pub mod two_factor;
pub mod ws;

use axum::{
    http::{header, HeaderName, HeaderValue, Method},
    middleware as axum_middleware,
    routing::{get, post, put},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::{
    docs::ApiDoc,
    middleware::{self as app_middleware, REQUEST_ID_HEADER},
    state::AppState,
    utils::cookies::CSRF_HEADER_NAME,
};

const CORS_MAX_AGE_SECS: u64 = 24 * 60 * 60;

/// Assembles every route with the shared layers. Protected routes require a
/// session, and the state-changing ones a matching CSRF token.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/api/auth/login", post(auth::login))
        .route("/api/auth/2fa/verify", post(auth::verify_two_factor))
        .route("/api/auth/session", get(auth::session))
        .route("/api/auth/logout", post(auth::logout))
        .route("/api/ws", get(ws::upgrade))
        .route("/api/health", get(ws::health));

    let protected_routes = Router::new()
        .route("/api/auth/2fa/setup", post(two_factor::setup))
        .route("/api/auth/2fa/enable", post(two_factor::enable))
        .route("/api/auth/2fa/disable", post(two_factor::disable))
        .route(
            "/api/auth/2fa/backup-codes",
            post(two_factor::regenerate_backup_codes),
        )
        .route("/api/auth/2fa/status", get(two_factor::status))
        .route("/api/auth/change-password", put(auth::change_password))
        .route_layer(axum_middleware::from_fn(app_middleware::require_csrf))
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            app_middleware::require_auth,
        ));

    let cors = cors_layer(&state.config.cors_allow_origins);

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(
            ServiceBuilder::new()
                .layer(axum_middleware::from_fn(app_middleware::request_id))
                .layer(TraceLayer::new_for_http())
                .layer(cors)
                .layer(axum_middleware::from_fn(
                    app_middleware::log_error_responses,
                )),
        )
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_credentials(true)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::CONTENT_TYPE,
            HeaderName::from_static(CSRF_HEADER_NAME),
            HeaderName::from_static(REQUEST_ID_HEADER),
        ])
        .max_age(std::time::Duration::from_secs(CORS_MAX_AGE_SECS))
}
