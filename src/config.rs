use anyhow::Context;
use serde::Deserialize;
use time::{macros::format_description, UtcOffset};

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PushConfig {
    pub endpoint: String,
    pub api_key: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub tick_secs: u64,
    pub dispatch_concurrency: usize,
    /// Offset of the single reference timezone used to derive "now" for matching.
    pub reference_offset: UtcOffset,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub jwt: JwtConfig,
    pub push: PushConfig,
    pub scheduler: SchedulerConfig,
    pub invitation_ttl_hours: i64,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL is not set")?;
        let jwt = JwtConfig {
            secret: std::env::var("JWT_SECRET").context("JWT_SECRET is not set")?,
            issuer: std::env::var("JWT_ISSUER").unwrap_or_else(|_| "medremind".into()),
            audience: std::env::var("JWT_AUDIENCE").unwrap_or_else(|_| "medremind-users".into()),
        };
        let push = PushConfig {
            endpoint: std::env::var("PUSH_GATEWAY_URL")
                .unwrap_or_else(|_| "http://localhost:8081/v1/messages:send".into()),
            api_key: std::env::var("PUSH_GATEWAY_KEY").unwrap_or_default(),
            timeout_secs: env_parse("PUSH_TIMEOUT_SECS", 10),
        };
        let reference_offset = match std::env::var("REFERENCE_UTC_OFFSET") {
            Ok(raw) => parse_utc_offset(&raw)?,
            Err(_) => UtcOffset::UTC,
        };
        let scheduler = SchedulerConfig {
            tick_secs: env_parse("SCHEDULER_TICK_SECS", 60),
            dispatch_concurrency: env_parse("DISPATCH_CONCURRENCY", 8),
            reference_offset,
        };
        Ok(Self {
            database_url,
            jwt,
            push,
            scheduler,
            invitation_ttl_hours: env_parse("INVITATION_TTL_HOURS", 24),
        })
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

/// Parses `+HH:MM` / `-HH:MM`.
pub fn parse_utc_offset(raw: &str) -> anyhow::Result<UtcOffset> {
    UtcOffset::parse(
        raw.trim(),
        format_description!("[offset_hour sign:mandatory]:[offset_minute]"),
    )
    .with_context(|| format!("invalid REFERENCE_UTC_OFFSET {raw:?}, expected +HH:MM"))
}
