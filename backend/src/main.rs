use std::{net::SocketAddr, time::Duration};

use chrono::Utc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gatehouse_backend::{
    config::Config,
    db::connection::{create_pool, DbPool},
    handlers,
    state::AppState,
};

fn mask_secret(s: &str) -> String {
    if s.is_empty() {
        return "<empty>".into();
    }
    let prefix = s.chars().take(4).collect::<String>();
    format!("{}*** (len={})", prefix, s.len())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gatehouse_backend=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load()?;
    tracing::info!(
        database = config.database_url.is_some(),
        bind_addr = %config.bind_addr,
        session_ttl_hours = config.session_ttl_hours,
        remember_me_ttl_days = config.remember_me_ttl_days,
        two_factor_enabled = config.two_factor_enabled,
        mfa_issuer = %config.mfa_issuer,
        mfa_encryption_key = %mask_secret(&config.mfa_encryption_key),
        rooms = config.ws_rooms.len(),
        "Loaded configuration from environment/.env"
    );

    let state = match config.database_url.clone() {
        Some(database_url) => {
            let pool: DbPool = create_pool(&database_url).await?;
            sqlx::migrate!("./migrations").run(&pool).await?;
            AppState::postgres(pool, config.clone())
        }
        None => {
            tracing::warn!("DATABASE_URL not set, every store is in memory and lost on restart");
            AppState::in_memory(config.clone()).0
        }
    };

    spawn_maintenance(state.clone(), config.maintenance_interval_seconds);

    let hub = state.hub.clone();
    let app = handlers::router(state);

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    tracing::info!("Server listening on {}", config.bind_addr);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        shutdown_signal().await;
        let closed = hub.disconnect_all();
        tracing::info!(closed, "Closed realtime connections for shutdown");
    })
    .await?;

    Ok(())
}

fn spawn_maintenance(state: AppState, interval_seconds: u64) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(interval_seconds.max(1)));
        loop {
            interval.tick().await;
            match state.run_maintenance(Utc::now()).await {
                Ok(report) => tracing::debug!(?report, "Maintenance sweep finished"),
                Err(err) => tracing::warn!(error = ?err, "Maintenance sweep failed"),
            }
        }
    });
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
