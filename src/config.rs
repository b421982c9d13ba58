//! Configuration types.
//!
//! Every struct has a `Default` matching production policy and a `from_env()`
//! constructor that overrides individual fields from `WARMUP_*` variables.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

/// Warmup scheduler configuration.
#[derive(Debug, Clone)]
pub struct WarmupConfig {
    /// Ramp length in days for new schedules.
    pub total_days: u32,
    /// Day-0 ceiling.
    pub base_volume: u32,
    /// Ceiling once the ramp completes.
    pub max_daily: u32,
    /// Health score below which a schedule is auto-paused.
    pub pause_threshold: u8,
    /// Default for the per-schedule auto-pause flag.
    pub auto_pause_on_bounce: bool,
    /// How often the background ticker evaluates schedules.
    pub tick_interval: Duration,
    /// Cron expression (with seconds) for background warmup traffic runs.
    pub traffic_schedule: String,
    /// Peer mailboxes that receive simulated warmup conversations.
    pub peer_addresses: Vec<String>,
    /// Pacing between warmup traffic sends.
    pub traffic_delay: Duration,
    /// Percent of the day's target that warmup traffic may use, spread over
    /// the day's traffic runs. The rest stays free for campaigns.
    pub traffic_share_percent: u32,
    /// Trailing window used for health scoring.
    pub health_window_days: u32,
}

impl Default for WarmupConfig {
    fn default() -> Self {
        Self {
            total_days: 14,
            base_volume: 5,
            max_daily: 50,
            pause_threshold: 30,
            auto_pause_on_bounce: true,
            tick_interval: Duration::from_secs(900), // 15 minutes
            traffic_schedule: "0 0 9,13,17 * * *".to_string(),
            peer_addresses: Vec::new(),
            traffic_delay: Duration::from_secs(30),
            traffic_share_percent: 30,
            health_window_days: 7,
        }
    }
}

impl WarmupConfig {
    /// Build from environment, falling back to defaults for unset variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            total_days: env_parse("WARMUP_TOTAL_DAYS", defaults.total_days)?,
            base_volume: env_parse("WARMUP_BASE_VOLUME", defaults.base_volume)?,
            max_daily: env_parse("WARMUP_MAX_DAILY", defaults.max_daily)?,
            pause_threshold: env_parse("WARMUP_PAUSE_THRESHOLD", defaults.pause_threshold)?,
            auto_pause_on_bounce: env_parse(
                "WARMUP_AUTO_PAUSE_ON_BOUNCE",
                defaults.auto_pause_on_bounce,
            )?,
            tick_interval: Duration::from_secs(env_parse(
                "WARMUP_TICK_INTERVAL_SECS",
                defaults.tick_interval.as_secs(),
            )?),
            traffic_schedule: std::env::var("WARMUP_TRAFFIC_SCHEDULE")
                .unwrap_or(defaults.traffic_schedule),
            peer_addresses: env_list("WARMUP_PEER_ADDRESSES"),
            traffic_delay: Duration::from_millis(env_parse(
                "WARMUP_TRAFFIC_DELAY_MS",
                defaults.traffic_delay.as_millis() as u64,
            )?),
            traffic_share_percent: env_parse(
                "WARMUP_TRAFFIC_SHARE_PERCENT",
                defaults.traffic_share_percent,
            )?
            .min(100),
            health_window_days: env_parse(
                "WARMUP_HEALTH_WINDOW_DAYS",
                defaults.health_window_days,
            )?,
        })
    }
}

/// Quota ledger configuration.
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// Ceiling for accounts with neither an active ramp nor a send policy.
    pub default_daily_limit: u32,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            default_daily_limit: 50,
        }
    }
}

impl LedgerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            default_daily_limit: env_parse(
                "WARMUP_DEFAULT_DAILY_LIMIT",
                Self::default().default_daily_limit,
            )?,
        })
    }
}

/// HTTP/WebSocket server and storage settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub db_path: PathBuf,
    /// Directory for rolling log files; stderr only when unset.
    pub log_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            db_path: PathBuf::from("./data/mail-warmup.db"),
            log_dir: None,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            port: env_parse("WARMUP_PORT", defaults.port)?,
            db_path: std::env::var("WARMUP_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.db_path),
            log_dir: std::env::var("WARMUP_LOG_DIR").ok().map(PathBuf::from),
        })
    }
}

/// Parse an env var, returning `default` when it is unset.
fn env_parse<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}

/// Comma-separated list from an env var; empty when unset.
fn env_list(key: &str) -> Vec<String> {
    std::env::var(key)
        .unwrap_or_default()
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
