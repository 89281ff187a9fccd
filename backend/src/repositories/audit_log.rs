use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::models::audit_log::AuditLog;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AuditLogRepository: Send + Sync {
    async fn insert(&self, log: &AuditLog) -> anyhow::Result<()>;

    async fn delete_before(&self, cutoff: DateTime<Utc>) -> anyhow::Result<u64>;
}

#[derive(Clone)]
pub struct PgAuditLogRepository {
    pool: PgPool,
}

impl PgAuditLogRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditLogRepository for PgAuditLogRepository {
    async fn insert(&self, log: &AuditLog) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO audit_logs \
             (id, occurred_at, actor_id, event_type, result, reason, ip, metadata) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(&log.id)
        .bind(log.occurred_at)
        .bind(&log.actor_id)
        .bind(&log.event_type)
        .bind(&log.result)
        .bind(&log.reason)
        .bind(&log.ip)
        .bind(&log.metadata)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_before(&self, cutoff: DateTime<Utc>) -> anyhow::Result<u64> {
        let result = sqlx::query("DELETE FROM audit_logs WHERE occurred_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
