use std::path::Path;

use anyhow::{Context, Result};
use chrono::Weekday;
use secrecy::SecretString;
use serde::Deserialize;

pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub scheduler: SchedulerConfig,
    pub provider: ProviderConfig,
    pub rate_limit: RateLimitConfig,
    pub sync: SyncConfig,
    pub chat: ChatConfig,
    pub monitoring: MonitoringConfig,
    pub database: DatabaseConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    pub poll_interval_seconds: u64,
    pub daily_hour: u32,
    pub weekly_weekday: Weekday,
    pub weekly_hour: u32,
    /// IANA zone for the daily and weekly triggers, e.g. `Europe/Paris`.
    pub timezone: String,
    pub live_window_seconds: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    pub base_url: String,
    pub timeout_seconds: u64,
    /// Season year sent to the provider. Defaults to the current year.
    #[serde(default)]
    pub season: Option<i32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    pub requests_per_second: u32,
    pub burst_size: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub max_retries: u32,
    pub event_batch_size: usize,
    pub event_batch_delay_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    pub chunk_size: usize,
    /// Create missing and delete surplus handles when the chunk count changes.
    pub reconcile_drift: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatMode {
    DryRun,
    Discord,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatConfig {
    pub mode: ChatMode,
    pub api_base_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitoringConfig {
    pub log_level: String,
    pub health_enabled: bool,
    pub health_bind: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
}

/// Secrets loaded exclusively from environment variables.
/// Not serializable, not stored in config files.
pub struct Secrets {
    pub football_api_key: Option<SecretString>,
    pub discord_token: Option<SecretString>,
}

impl Secrets {
    pub fn from_env() -> Self {
        Self {
            football_api_key: std::env::var("FOOTBALL_API_KEY")
                .ok()
                .map(SecretString::from),
            discord_token: std::env::var("DISCORD_TOKEN").ok().map(SecretString::from),
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file, overlaying environment variables for secrets.
    pub fn load(path: &Path) -> Result<(Self, Secrets)> {
        dotenvy::dotenv().ok();

        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config = Self::parse(&contents)
            .with_context(|| format!("Failed to parse {}", path.display()))?;

        Ok((config, Secrets::from_env()))
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        if config.sync.chunk_size == 0 {
            anyhow::bail!("sync.chunk_size must be at least 1");
        }
        if config.rate_limit.event_batch_size == 0 {
            anyhow::bail!("rate_limit.event_batch_size must be at least 1");
        }
        Ok(config)
    }
}
