use anyhow::Context;
use chrono::{Duration, Utc};
use gatehouse_backend::{
    config::Config,
    db::connection::create_pool,
    repositories::{
        AuditLogRepository, PgAuditLogRepository, PgSessionRepository, SessionRepository,
    },
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "session_cleanup=info,gatehouse_backend=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load()?;
    let database_url = config
        .database_url
        .as_deref()
        .context("DATABASE_URL must be set to clean up persisted sessions")?;
    let pool = create_pool(database_url).await?;

    let now = Utc::now();
    let sessions = PgSessionRepository::new(pool.clone());
    let deleted_sessions = sessions.delete_expired(now).await?;
    if deleted_sessions > 0 {
        tracing::info!("Deleted {} expired sessions", deleted_sessions);
    }

    sqlx::query("VACUUM (ANALYZE) sessions")
        .execute(&pool)
        .await
        .context("vacuum sessions table")?;

    if config.audit_log_retention_days > 0 {
        let cutoff = now - Duration::days(config.audit_log_retention_days as i64);
        let audit_logs = PgAuditLogRepository::new(pool.clone());
        let deleted_logs = audit_logs.delete_before(cutoff).await?;
        if deleted_logs > 0 {
            tracing::info!(%cutoff, "Deleted {} audit log rows", deleted_logs);
        }
    }

    Ok(())
}
