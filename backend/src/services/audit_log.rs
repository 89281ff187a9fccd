//! Security event trail. Writes are awaited inline but never fail the
//! operation that produced them.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::types::Json;
use uuid::Uuid;

use crate::models::audit_log::AuditLog;
use crate::repositories::AuditLogRepository;
use crate::types::UserId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditEventType {
    Login,
    Lockout,
    TwoFactorChallenge,
    TwoFactorVerify,
    TwoFactorSetup,
    TwoFactorEnable,
    TwoFactorDisable,
    BackupCodesRegenerate,
    Logout,
    PasswordChange,
}

impl AuditEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEventType::Login => "auth.login",
            AuditEventType::Lockout => "auth.lockout",
            AuditEventType::TwoFactorChallenge => "auth.2fa.challenge",
            AuditEventType::TwoFactorVerify => "auth.2fa.verify",
            AuditEventType::TwoFactorSetup => "auth.2fa.setup",
            AuditEventType::TwoFactorEnable => "auth.2fa.enable",
            AuditEventType::TwoFactorDisable => "auth.2fa.disable",
            AuditEventType::BackupCodesRegenerate => "auth.2fa.backup_codes",
            AuditEventType::Logout => "auth.logout",
            AuditEventType::PasswordChange => "auth.password_change",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditResult {
    Success,
    Failure,
}

impl AuditResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditResult::Success => "success",
            AuditResult::Failure => "failure",
        }
    }
}

#[derive(Debug, Clone)]
pub struct AuditLogEntry {
    pub occurred_at: DateTime<Utc>,
    pub actor_id: Option<UserId>,
    pub event_type: AuditEventType,
    pub result: AuditResult,
    /// Machine-readable cause, e.g. `unknown_email` or `wrong_password`.
    pub reason: Option<String>,
    pub ip: Option<String>,
    pub metadata: Option<Value>,
}

impl AuditLogEntry {
    pub fn success(event_type: AuditEventType) -> Self {
        Self::new(event_type, AuditResult::Success)
    }

    pub fn failure(event_type: AuditEventType, reason: &str) -> Self {
        Self::new(event_type, AuditResult::Failure).reason(reason)
    }

    fn new(event_type: AuditEventType, result: AuditResult) -> Self {
        Self {
            occurred_at: Utc::now(),
            actor_id: None,
            event_type,
            result,
            reason: None,
            ip: None,
            metadata: None,
        }
    }

    pub fn actor(mut self, actor_id: UserId) -> Self {
        self.actor_id = Some(actor_id);
        self
    }

    pub fn reason(mut self, reason: &str) -> Self {
        self.reason = Some(reason.to_string());
        self
    }

    pub fn ip(mut self, ip: Option<&str>) -> Self {
        self.ip = ip.map(str::to_string);
        self
    }

    pub fn metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

#[derive(Clone)]
pub struct AuditLogService {
    repo: Arc<dyn AuditLogRepository>,
}

impl AuditLogService {
    pub fn new(repo: Arc<dyn AuditLogRepository>) -> Self {
        Self { repo }
    }

    pub async fn record_event(&self, entry: AuditLogEntry) {
        let log = AuditLog {
            id: Uuid::new_v4().to_string(),
            occurred_at: entry.occurred_at,
            actor_id: entry.actor_id.map(|id| id.to_string()),
            event_type: entry.event_type.as_str().to_string(),
            result: entry.result.as_str().to_string(),
            reason: entry.reason,
            ip: entry.ip,
            metadata: entry.metadata.map(Json),
        };

        if let Err(err) = self.repo.insert(&log).await {
            tracing::warn!(
                error = ?err,
                event_type = %log.event_type,
                result = %log.result,
                "Failed to record audit log"
            );
        }
    }

    pub async fn delete_logs_before(&self, cutoff: DateTime<Utc>) -> anyhow::Result<u64> {
        self.repo.delete_before(cutoff).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::audit_log::MockAuditLogRepository;

    #[tokio::test]
    async fn record_event_maps_entry_fields() {
        let mut repo = MockAuditLogRepository::new();
        let actor = UserId::new();
        repo.expect_insert()
            .withf(move |log| {
                log.event_type == "auth.login"
                    && log.result == "failure"
                    && log.reason.as_deref() == Some("wrong_password")
                    && log.actor_id.as_deref() == Some(actor.to_string().as_str())
                    && log.ip.as_deref() == Some("10.0.0.9")
            })
            .times(1)
            .returning(|_| Ok(()));

        let service = AuditLogService::new(Arc::new(repo));
        service
            .record_event(
                AuditLogEntry::failure(AuditEventType::Login, "wrong_password")
                    .actor(actor)
                    .ip(Some("10.0.0.9")),
            )
            .await;
    }

    #[tokio::test]
    async fn record_event_swallows_storage_errors() {
        let mut repo = MockAuditLogRepository::new();
        repo.expect_insert()
            .returning(|_| Err(anyhow::anyhow!("db unavailable")));

        let service = AuditLogService::new(Arc::new(repo));
        service
            .record_event(AuditLogEntry::success(AuditEventType::Logout))
            .await;
    }
}
