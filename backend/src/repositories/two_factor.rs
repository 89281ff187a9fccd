use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::models::two_factor::TwoFactorRecord;
use crate::types::UserId;

/// Active two-factor enrollments. Enabling and disabling also flip the
/// owning user's `two_factor_enabled` flag in the same write.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TwoFactorRepository: Send + Sync {
    async fn find(&self, user_id: UserId) -> anyhow::Result<Option<TwoFactorRecord>>;

    async fn enable(&self, record: &TwoFactorRecord) -> anyhow::Result<()>;

    async fn disable(&self, user_id: UserId) -> anyhow::Result<()>;

    /// Removes `code_hash` from the user's set if it is still present and
    /// returns how many codes remain. `None` means the code was not in the
    /// set, for example because a concurrent request consumed it first.
    async fn consume_backup_code(
        &self,
        user_id: UserId,
        code_hash: &str,
    ) -> anyhow::Result<Option<usize>>;

    async fn replace_backup_codes(&self, user_id: UserId, hashes: &[String])
        -> anyhow::Result<()>;
}

#[derive(sqlx::FromRow)]
struct TwoFactorRow {
    user_id: UserId,
    secret_ciphertext: String,
    backup_code_hashes: Vec<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct PgTwoFactorRepository {
    pool: PgPool,
}

impl PgTwoFactorRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TwoFactorRepository for PgTwoFactorRepository {
    async fn find(&self, user_id: UserId) -> anyhow::Result<Option<TwoFactorRecord>> {
        let row = sqlx::query_as::<_, TwoFactorRow>(
            "SELECT user_id, secret_ciphertext, backup_code_hashes, created_at, updated_at \
             FROM two_factor WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|row| TwoFactorRecord {
            user_id: row.user_id,
            secret_ciphertext: row.secret_ciphertext,
            backup_code_hashes: row.backup_code_hashes,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }))
    }

    async fn enable(&self, record: &TwoFactorRecord) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO two_factor (user_id, secret_ciphertext, backup_code_hashes, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (user_id) DO UPDATE
            SET secret_ciphertext = EXCLUDED.secret_ciphertext,
                backup_code_hashes = EXCLUDED.backup_code_hashes,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(record.user_id)
        .bind(&record.secret_ciphertext)
        .bind(&record.backup_code_hashes)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&mut *tx)
        .await?;
        sqlx::query("UPDATE users SET two_factor_enabled = TRUE, updated_at = NOW() WHERE id = $1")
            .bind(record.user_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn disable(&self, user_id: UserId) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM two_factor WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE users SET two_factor_enabled = FALSE, updated_at = NOW() WHERE id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn consume_backup_code(
        &self,
        user_id: UserId,
        code_hash: &str,
    ) -> anyhow::Result<Option<usize>> {
        let remaining = sqlx::query_scalar::<_, i32>(
            r#"
            UPDATE two_factor
            SET backup_code_hashes = array_remove(backup_code_hashes, $2),
                updated_at = NOW()
            WHERE user_id = $1 AND $2 = ANY(backup_code_hashes)
            RETURNING cardinality(backup_code_hashes)
            "#,
        )
        .bind(user_id)
        .bind(code_hash)
        .fetch_optional(&self.pool)
        .await?;
        Ok(remaining.map(|count| count.max(0) as usize))
    }

    async fn replace_backup_codes(
        &self,
        user_id: UserId,
        hashes: &[String],
    ) -> anyhow::Result<()> {
        sqlx::query(
            "UPDATE two_factor SET backup_code_hashes = $2, updated_at = NOW() WHERE user_id = $1",
        )
        .bind(user_id)
        .bind(hashes)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
