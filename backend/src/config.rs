use anyhow::anyhow;
use serde::{Deserialize, Serialize};
use std::{env, net::SocketAddr, str::FromStr};

use crate::realtime::room::{parse_room_specs, RoomConfig};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// PostgreSQL connection string. When absent every store runs in memory.
    pub database_url: Option<String>,
    pub bind_addr: SocketAddr,
    pub session_ttl_hours: u64,
    pub remember_me_ttl_days: u64,
    pub login_rate_limit_max_attempts: u32,
    pub login_rate_limit_window_seconds: u64,
    pub account_lockout_threshold: u32,
    pub account_lockout_duration_minutes: u64,
    /// Global switch; per-user enrollment only matters while this is on.
    pub two_factor_enabled: bool,
    pub mfa_issuer: String,
    pub mfa_encryption_key: String,
    pub cookie_secure: bool,
    pub trust_proxy_headers: bool,
    pub cors_allow_origins: Vec<String>,
    pub ws_messages_per_second: u32,
    pub ws_message_burst: u32,
    pub ws_outbound_buffer: usize,
    pub ws_rooms: Vec<RoomConfig>,
    pub maintenance_interval_seconds: u64,
    /// Audit rows older than this are removed by `session_cleanup`; 0 keeps them.
    pub audit_log_retention_days: u64,
    pub production_mode: bool,
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let database_url = env::var("DATABASE_URL")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());

        let bind_addr = env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
        let bind_addr: SocketAddr = bind_addr
            .parse()
            .map_err(|_| anyhow!("Invalid BIND_ADDR value: {}", bind_addr))?;

        let production_mode = parse_bool_env("PRODUCTION_MODE", false);

        let mfa_encryption_key = match env::var("MFA_ENCRYPTION_KEY") {
            Ok(value) if !value.trim().is_empty() => value,
            _ if production_mode => {
                return Err(anyhow!("MFA_ENCRYPTION_KEY must be set in production mode"))
            }
            _ => "insecure-development-mfa-key-change-me".to_string(),
        };

        let ws_rooms = match env::var("WS_ROOMS") {
            Ok(raw) if !raw.trim().is_empty() => parse_room_specs(&raw)?,
            _ => RoomConfig::defaults(),
        };

        let cors_allow_origins = env::var("CORS_ALLOW_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:8000".to_string())
            .split(',')
            .map(|origin| origin.trim().trim_end_matches('/').to_string())
            .filter(|origin| !origin.is_empty())
            .collect();

        Ok(Config {
            database_url,
            bind_addr,
            session_ttl_hours: parse_env("SESSION_TTL_HOURS", 24),
            remember_me_ttl_days: parse_env("REMEMBER_ME_TTL_DAYS", 30),
            login_rate_limit_max_attempts: parse_env("LOGIN_RATE_LIMIT_MAX_ATTEMPTS", 5),
            login_rate_limit_window_seconds: parse_env("LOGIN_RATE_LIMIT_WINDOW_SECONDS", 900),
            account_lockout_threshold: parse_env("ACCOUNT_LOCKOUT_THRESHOLD", 5),
            account_lockout_duration_minutes: parse_env("ACCOUNT_LOCKOUT_DURATION_MINUTES", 30),
            two_factor_enabled: parse_bool_env("TWO_FACTOR_ENABLED", true),
            mfa_issuer: env::var("MFA_ISSUER").unwrap_or_else(|_| "Gatehouse".to_string()),
            mfa_encryption_key,
            cookie_secure: parse_bool_env("COOKIE_SECURE", production_mode),
            trust_proxy_headers: parse_bool_env("TRUST_PROXY_HEADERS", false),
            cors_allow_origins,
            ws_messages_per_second: parse_env("WS_MESSAGES_PER_SECOND", 10),
            ws_message_burst: parse_env("WS_MESSAGE_BURST", 20),
            ws_outbound_buffer: parse_env("WS_OUTBOUND_BUFFER", 64),
            ws_rooms,
            maintenance_interval_seconds: parse_env("MAINTENANCE_INTERVAL_SECONDS", 60),
            audit_log_retention_days: parse_env("AUDIT_LOG_RETENTION_DAYS", 0),
            production_mode,
        })
    }

    /// Configuration suitable for local runs and tests: in-memory stores and
    /// the documented default limits.
    pub fn development() -> Self {
        Config {
            database_url: None,
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
            session_ttl_hours: 24,
            remember_me_ttl_days: 30,
            login_rate_limit_max_attempts: 5,
            login_rate_limit_window_seconds: 900,
            account_lockout_threshold: 5,
            account_lockout_duration_minutes: 30,
            two_factor_enabled: true,
            mfa_issuer: "Gatehouse".to_string(),
            mfa_encryption_key: "insecure-development-mfa-key-change-me".to_string(),
            cookie_secure: false,
            trust_proxy_headers: false,
            cors_allow_origins: vec!["http://localhost:8000".to_string()],
            ws_messages_per_second: 10,
            ws_message_burst: 20,
            ws_outbound_buffer: 64,
            ws_rooms: RoomConfig::defaults(),
            maintenance_interval_seconds: 60,
            audit_log_retention_days: 0,
            production_mode: false,
        }
    }
}

/// The single predicate combining the global feature flag with the per-user
/// enrollment flag.
pub fn two_factor_required(feature_enabled: bool, user_enrolled: bool) -> bool {
    feature_enabled && user_enrolled
}

fn parse_env<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_bool_env(key: &str, default: bool) -> bool {
    env::var(key)
        .ok()
        .and_then(|value| parse_bool(&value))
        .unwrap_or(default)
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
