use axum::{
    extract::{Extension, State},
    Json,
};

use crate::{
    error::AppError,
    middleware::AuthContext,
    models::{
        session::SuccessResponse,
        two_factor::{
            BackupCodesResponse, TwoFactorCodeRequest, TwoFactorDisableRequest,
            TwoFactorSetupResponse, TwoFactorStatusResponse,
        },
    },
    state::AppState,
};

pub async fn setup(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
) -> Result<Json<TwoFactorSetupResponse>, AppError> {
    let response = state.two_factor.setup(&context.user).await?;
    Ok(Json(response))
}

pub async fn enable(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    Json(payload): Json<TwoFactorCodeRequest>,
) -> Result<Json<SuccessResponse>, AppError> {
    state
        .two_factor
        .enable(&context.user, payload.code.trim())
        .await?;
    Ok(Json(SuccessResponse::ok()))
}

pub async fn disable(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    Json(payload): Json<TwoFactorDisableRequest>,
) -> Result<Json<SuccessResponse>, AppError> {
    state
        .two_factor
        .disable(&context.user, &payload.password)
        .await?;
    Ok(Json(SuccessResponse::ok()))
}

pub async fn status(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
) -> Result<Json<TwoFactorStatusResponse>, AppError> {
    Ok(Json(state.two_factor.status(&context.user).await?))
}

pub async fn regenerate_backup_codes(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    Json(payload): Json<TwoFactorCodeRequest>,
) -> Result<Json<BackupCodesResponse>, AppError> {
    let backup_codes = state
        .two_factor
        .regenerate_backup_codes(&context.user, payload.code.trim())
        .await?;
    Ok(Json(BackupCodesResponse { backup_codes }))
}
