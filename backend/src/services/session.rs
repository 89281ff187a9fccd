//! Issues, validates and revokes server-side login sessions.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use crate::models::session::{IssuedSession, SessionRecord};
use crate::models::user::User;
use crate::repositories::{SessionRepository, UserRepository};
use crate::services::csrf::CsrfGuard;
use crate::types::UserId;
use crate::utils::security::{generate_secure_token, hash_token};

#[derive(Clone)]
pub struct SessionManager {
    sessions: Arc<dyn SessionRepository>,
    users: Arc<dyn UserRepository>,
    ttl: Duration,
    remember_me_ttl: Duration,
}

impl SessionManager {
    pub fn new(
        sessions: Arc<dyn SessionRepository>,
        users: Arc<dyn UserRepository>,
        ttl: Duration,
        remember_me_ttl: Duration,
    ) -> Self {
        Self {
            sessions,
            users,
            ttl,
            remember_me_ttl,
        }
    }

    pub fn lifetime(&self, remember_me: bool) -> Duration {
        if remember_me {
            self.remember_me_ttl
        } else {
            self.ttl
        }
    }

    pub async fn issue(&self, user_id: UserId, remember_me: bool) -> anyhow::Result<IssuedSession> {
        let token = generate_secure_token();
        let now = Utc::now();
        let record = SessionRecord {
            id_hash: hash_token(&token),
            user_id,
            csrf_token: CsrfGuard::mint(),
            remember_me,
            created_at: now,
            expires_at: now + self.lifetime(remember_me),
        };
        self.sessions.create(&record).await?;
        tracing::debug!(%user_id, remember_me, "Issued session");
        Ok(IssuedSession { token, record })
    }

    /// Resolves a session token to its record and owner. Missing, expired and
    /// orphaned sessions all come back as `None`; stale rows are removed.
    pub async fn validate(&self, token: &str) -> anyhow::Result<Option<(SessionRecord, User)>> {
        self.validate_at(token, Utc::now()).await
    }

    pub async fn validate_at(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Option<(SessionRecord, User)>> {
        if token.is_empty() {
            return Ok(None);
        }
        let id_hash = hash_token(token);
        let Some(record) = self.sessions.find(&id_hash).await? else {
            return Ok(None);
        };
        if record.is_expired_at(now) {
            self.sessions.delete(&id_hash).await?;
            return Ok(None);
        }
        match self.users.find_by_id(record.user_id).await? {
            Some(user) => Ok(Some((record, user))),
            None => {
                self.sessions.delete(&id_hash).await?;
                Ok(None)
            }
        }
    }

    pub async fn revoke(&self, token: &str) -> anyhow::Result<bool> {
        self.sessions.delete(&hash_token(token)).await
    }

    /// Revokes the caller's current session (if any) before issuing a new
    /// one, so a pre-planted session id never survives authentication.
    pub async fn replace(
        &self,
        existing: Option<&str>,
        user_id: UserId,
        remember_me: bool,
    ) -> anyhow::Result<IssuedSession> {
        if let Some(token) = existing.filter(|token| !token.is_empty()) {
            self.revoke(token).await?;
        }
        self.issue(user_id, remember_me).await
    }

    pub async fn revoke_all_for_user(&self, user_id: UserId) -> anyhow::Result<u64> {
        self.sessions.delete_for_user(user_id).await
    }

    pub async fn purge_expired(&self, now: DateTime<Utc>) -> anyhow::Result<u64> {
        self.sessions.delete_expired(now).await
    }
}
