use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::models::session::SessionRecord;
use crate::types::UserId;

/// Storage for login sessions, addressed by the digest of the session id.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn create(&self, record: &SessionRecord) -> anyhow::Result<()>;

    async fn find(&self, id_hash: &str) -> anyhow::Result<Option<SessionRecord>>;

    async fn delete(&self, id_hash: &str) -> anyhow::Result<bool>;

    async fn delete_for_user(&self, user_id: UserId) -> anyhow::Result<u64>;

    async fn delete_expired(&self, now: DateTime<Utc>) -> anyhow::Result<u64>;
}

#[derive(sqlx::FromRow)]
struct SessionRow {
    id_hash: String,
    user_id: UserId,
    csrf_token: String,
    remember_me: bool,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl From<SessionRow> for SessionRecord {
    fn from(row: SessionRow) -> Self {
        SessionRecord {
            id_hash: row.id_hash,
            user_id: row.user_id,
            csrf_token: row.csrf_token,
            remember_me: row.remember_me,
            created_at: row.created_at,
            expires_at: row.expires_at,
        }
    }
}

#[derive(Clone)]
pub struct PgSessionRepository {
    pool: PgPool,
}

impl PgSessionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionRepository for PgSessionRepository {
    async fn create(&self, record: &SessionRecord) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sessions (id_hash, user_id, csrf_token, remember_me, created_at, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(&record.id_hash)
        .bind(record.user_id)
        .bind(&record.csrf_token)
        .bind(record.remember_me)
        .bind(record.created_at)
        .bind(record.expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find(&self, id_hash: &str) -> anyhow::Result<Option<SessionRecord>> {
        let row = sqlx::query_as::<_, SessionRow>(
            r#"
            SELECT id_hash, user_id, csrf_token, remember_me, created_at, expires_at
            FROM sessions
            WHERE id_hash = $1
            "#,
        )
        .bind(id_hash)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(SessionRecord::from))
    }

    async fn delete(&self, id_hash: &str) -> anyhow::Result<bool> {
        let result = sqlx::query("DELETE FROM sessions WHERE id_hash = $1")
            .bind(id_hash)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_for_user(&self, user_id: UserId) -> anyhow::Result<u64> {
        let result = sqlx::query("DELETE FROM sessions WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> anyhow::Result<u64> {
        let result = sqlx::query("DELETE FROM sessions WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
