//! Models for server-side login sessions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::user::UserResponse;
use crate::types::UserId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
/// Persistent representation of a login session. Only the digest of the
/// session identifier is stored; the raw value lives in the client cookie.
pub struct SessionRecord {
    /// SHA-256 digest of the opaque session identifier.
    pub id_hash: String,
    /// User that owns the session.
    pub user_id: UserId,
    /// CSRF token minted alongside the session and bound to it.
    pub csrf_token: String,
    /// Whether the long-lived lifetime was requested at login.
    pub remember_me: bool,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl SessionRecord {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

#[derive(Debug, Clone)]
/// A freshly issued session, carrying the raw identifier exactly once so it
/// can be written into the response cookie.
pub struct IssuedSession {
    pub token: String,
    pub record: SessionRecord,
}

impl IssuedSession {
    pub fn csrf_token(&self) -> &str {
        &self.record.csrf_token
    }

    /// Full session lifetime, used as the cookie `Max-Age`.
    pub fn max_age(&self) -> std::time::Duration {
        (self.record.expires_at - self.record.created_at)
            .to_std()
            .unwrap_or_default()
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
/// Body returned whenever a request ends with a fresh session.
pub struct SessionIssuedResponse {
    pub success: bool,
    pub user: UserResponse,
    /// Token to echo in the `x-csrf-token` header on state-changing calls.
    pub csrf_token: String,
    /// Unused backup codes left after a backup-code login.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup_codes_remaining: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
/// Body returned when the password was accepted but a second factor is owed.
pub struct TwoFactorChallengeResponse {
    pub success: bool,
    #[serde(rename = "requires2fa")]
    pub requires_2fa: bool,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
/// Current session as seen by the browser; `user` is null when signed out.
pub struct SessionStateResponse {
    pub user: Option<UserResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub csrf_token: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SuccessResponse {
    pub success: bool,
}

impl SuccessResponse {
    pub fn ok() -> Self {
        Self { success: true }
    }
}
