//! Application configuration loaded from environment variables.
//!
//! API tokens are not configuration: they live in the credential store and
//! are managed through the admin API.

use crate::models::Tier;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Default tier layout: front-runners every 2 minutes, the next group every
/// 4 minutes, everyone else whenever they become the stalest.
pub const DEFAULT_TIERS: &str = "fast:120,slow:240,rest:0";

/// Which store backend to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Firestore,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "firestore" => Ok(Self::Firestore),
            "memory" => Ok(Self::Memory),
            other => Err(ConfigError::Invalid("STORE_BACKEND", other.to_string())),
        }
    }
}

/// Application configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server port
    pub port: u16,
    /// GCP project ID
    pub gcp_project_id: String,
    /// Store backend
    pub store_backend: StoreBackend,

    // --- Upstream ---
    /// Race Monitor API base URL
    pub race_monitor_base_url: String,
    /// Timeout for a single upstream call
    pub request_timeout: Duration,

    // --- Rate limiting ---
    /// Max calls per window, across all credentials
    pub rate_limit_max_calls: usize,
    /// Sliding window length
    pub rate_limit_window: Duration,

    // --- Scheduling ---
    /// Polling tiers, in tie-break order
    pub tiers: Vec<Tier>,
    /// Lower bound for the wait hint after a not-due tick
    pub min_tick: Duration,
    /// Start the scheduler loop at boot with this interval
    pub scheduler_interval: Option<Duration>,

    // --- Roster population ---
    /// Manually curated tier that population never modifies
    pub pinned_tier: String,
    /// Tier that receives the leading racers
    pub roster_top_tier: String,
    /// Tier that receives everyone else
    pub roster_rest_tier: String,
    /// How many leading racers go into the top tier
    pub roster_top_count: usize,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok(); // Load .env file if present

        let tiers = parse_tiers(&env_or("TIERS", DEFAULT_TIERS))?;

        let config = Self {
            port: parse_env("PORT", 8080)?,
            gcp_project_id: env_or("GCP_PROJECT_ID", "local-dev"),
            store_backend: env_or("STORE_BACKEND", "firestore").parse()?,
            race_monitor_base_url: env_or("RACE_MONITOR_BASE_URL", "https://api.race-monitor.com")
                .trim_end_matches('/')
                .to_string(),
            request_timeout: Duration::from_secs(parse_env("REQUEST_TIMEOUT_SECS", 30)?),
            rate_limit_max_calls: parse_env("RATE_LIMIT_MAX_CALLS", 10)?,
            rate_limit_window: Duration::from_secs(parse_env("RATE_LIMIT_WINDOW_SECS", 60)?),
            tiers,
            min_tick: Duration::from_secs(parse_env("MIN_TICK_SECS", 5)?),
            scheduler_interval: match env::var("SCHEDULER_INTERVAL_SECS") {
                Ok(v) => Some(Duration::from_secs(parse_value(
                    "SCHEDULER_INTERVAL_SECS",
                    &v,
                )?)),
                Err(_) => None,
            },
            pinned_tier: env_or("PINNED_TIER", "fast"),
            roster_top_tier: env_or("ROSTER_TOP_TIER", "slow"),
            roster_rest_tier: env_or("ROSTER_REST_TIER", "rest"),
            roster_top_count: parse_env("ROSTER_TOP_COUNT", 5)?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Default config for testing only (in-memory store).
    pub fn test_default() -> Self {
        Self {
            port: 8080,
            gcp_project_id: "test-project".to_string(),
            store_backend: StoreBackend::Memory,
            race_monitor_base_url: "http://localhost:9".to_string(),
            request_timeout: Duration::from_secs(30),
            rate_limit_max_calls: 10,
            rate_limit_window: Duration::from_secs(60),
            tiers: parse_tiers(DEFAULT_TIERS).unwrap_or_default(),
            min_tick: Duration::from_secs(5),
            scheduler_interval: None,
            pinned_tier: "fast".to_string(),
            roster_top_tier: "slow".to_string(),
            roster_rest_tier: "rest".to_string(),
            roster_top_count: 5,
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.rate_limit_max_calls == 0 {
            return Err(ConfigError::Invalid("RATE_LIMIT_MAX_CALLS", "0".to_string()));
        }
        if self.rate_limit_window.is_zero() {
            return Err(ConfigError::Invalid("RATE_LIMIT_WINDOW_SECS", "0".to_string()));
        }
        if self.scheduler_interval.is_some_and(|d| d.is_zero()) {
            return Err(ConfigError::Invalid("SCHEDULER_INTERVAL_SECS", "0".to_string()));
        }
        for (key, name) in [
            ("PINNED_TIER", &self.pinned_tier),
            ("ROSTER_TOP_TIER", &self.roster_top_tier),
            ("ROSTER_REST_TIER", &self.roster_rest_tier),
        ] {
            if !self.tiers.iter().any(|t| &t.name == name) {
                return Err(ConfigError::Invalid(key, name.clone()));
            }
        }
        Ok(())
    }
}

/// Parse `name:seconds` pairs separated by commas.
pub fn parse_tiers(raw: &str) -> Result<Vec<Tier>, ConfigError> {
    let mut tiers: Vec<Tier> = Vec::new();
    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (name, secs) = entry
            .split_once(':')
            .ok_or_else(|| ConfigError::Invalid("TIERS", entry.to_string()))?;
        let name = name.trim();
        let secs: u64 = secs
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid("TIERS", entry.to_string()))?;
        if name.is_empty() || tiers.iter().any(|t| t.name == name) {
            return Err(ConfigError::Invalid("TIERS", entry.to_string()));
        }
        tiers.push(Tier::new(name, Duration::from_secs(secs)));
    }
    if tiers.is_empty() {
        return Err(ConfigError::Invalid("TIERS", raw.to_string()));
    }
    Ok(tiers)
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_env<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(v) => parse_value(key, &v),
        Err(_) => Ok(default),
    }
}

fn parse_value<T: FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Invalid(key, value.to_string()))
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {0}: {1:?}")]
    Invalid(&'static str, String),
}
