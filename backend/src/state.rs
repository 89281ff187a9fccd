use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;

use crate::{
    config::Config,
    realtime::{ConnectionHub, HubLimits},
    repositories::{
        AuditLogRepository, MemoryStore, PgAuditLogRepository, PgSessionRepository,
        PgTwoFactorRepository, PgUserRepository, SessionRepository, TwoFactorRepository,
        UserRepository,
    },
    services::{
        audit_log::AuditLogService, credentials::CredentialStore, lockout::LockoutTracker,
        login::LoginOrchestrator, rate_limit::RateLimiter, session::SessionManager,
        two_factor::TwoFactorService,
    },
    utils::cookies::CookieOptions,
};

/// Persistent stores behind the services. Postgres in production, a shared
/// [`MemoryStore`] for development and tests.
#[derive(Clone)]
pub struct Repositories {
    pub users: Arc<dyn UserRepository>,
    pub sessions: Arc<dyn SessionRepository>,
    pub two_factor: Arc<dyn TwoFactorRepository>,
    pub audit_logs: Arc<dyn AuditLogRepository>,
}

impl Repositories {
    pub fn postgres(pool: PgPool) -> Self {
        Self {
            users: Arc::new(PgUserRepository::new(pool.clone())),
            sessions: Arc::new(PgSessionRepository::new(pool.clone())),
            two_factor: Arc::new(PgTwoFactorRepository::new(pool.clone())),
            audit_logs: Arc::new(PgAuditLogRepository::new(pool)),
        }
    }

    pub fn in_memory(store: Arc<MemoryStore>) -> Self {
        Self {
            users: store.clone(),
            sessions: store.clone(),
            two_factor: store.clone(),
            audit_logs: store,
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub cookies: CookieOptions,
    pub login: LoginOrchestrator,
    pub sessions: SessionManager,
    pub two_factor: TwoFactorService,
    pub credentials: CredentialStore,
    pub audit: AuditLogService,
    pub rate_limiter: RateLimiter,
    pub lockout: LockoutTracker,
    pub hub: Arc<ConnectionHub>,
}

/// Counts of entries dropped by one maintenance sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub rate_limit_keys: usize,
    pub lockout_records: usize,
    pub pending_two_factor: usize,
    pub sessions: u64,
}

impl AppState {
    pub fn new(config: Config, repos: Repositories) -> Self {
        let audit = AuditLogService::new(repos.audit_logs.clone());
        let credentials = CredentialStore::new(repos.users.clone());
        let sessions = SessionManager::new(
            repos.sessions.clone(),
            repos.users.clone(),
            Duration::hours(config.session_ttl_hours as i64),
            Duration::days(config.remember_me_ttl_days as i64),
        );
        let rate_limiter = RateLimiter::in_memory(
            config.login_rate_limit_max_attempts,
            Duration::seconds(config.login_rate_limit_window_seconds as i64),
        );
        let lockout = LockoutTracker::in_memory(
            config.account_lockout_threshold,
            Duration::minutes(config.account_lockout_duration_minutes as i64),
        );
        let two_factor = TwoFactorService::new(
            repos.two_factor.clone(),
            credentials.clone(),
            audit.clone(),
            config.mfa_issuer.clone(),
            config.mfa_encryption_key.clone(),
        );
        let login = LoginOrchestrator::new(
            rate_limiter.clone(),
            lockout.clone(),
            credentials.clone(),
            sessions.clone(),
            two_factor.clone(),
            audit.clone(),
            config.two_factor_enabled,
        );
        let hub = Arc::new(ConnectionHub::new(
            config.ws_rooms.clone(),
            HubLimits {
                messages_per_second: config.ws_messages_per_second,
                burst: config.ws_message_burst,
            },
        ));

        Self {
            cookies: CookieOptions::from_config(&config),
            config,
            login,
            sessions,
            two_factor,
            credentials,
            audit,
            rate_limiter,
            lockout,
            hub,
        }
    }

    pub fn postgres(pool: PgPool, config: Config) -> Self {
        Self::new(config, Repositories::postgres(pool))
    }

    /// State backed entirely by memory; returns the store so callers can seed
    /// users and inspect audit rows.
    pub fn in_memory(config: Config) -> (Self, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let state = Self::new(config, Repositories::in_memory(store.clone()));
        (state, store)
    }

    /// Drops expired rate-limit windows, lockout records, pending second
    /// factors and sessions.
    pub async fn run_maintenance(&self, now: DateTime<Utc>) -> anyhow::Result<MaintenanceReport> {
        let report = MaintenanceReport {
            rate_limit_keys: self.rate_limiter.purge_expired(now),
            lockout_records: self.lockout.purge_expired(now),
            pending_two_factor: self.two_factor.purge_expired(now),
            sessions: self.sessions.purge_expired(now).await?,
        };
        Ok(report)
    }
}
