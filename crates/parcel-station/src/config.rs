//! Station configuration from environment.

use anyhow::{Context, Result};
use parcel_core::LogisticsConfig;
use std::env;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub logistics: LogisticsConfig,
    /// Buffered events per subscriber before lagging ones start missing
    pub event_capacity: usize,
    pub leg_cache_max_entries: usize,
    pub leg_cache_ttl: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            logistics: LogisticsConfig::default(),
            event_capacity: 1024,
            leg_cache_max_entries: 10_000,
            leg_cache_ttl: Duration::from_secs(900),
        }
    }
}

impl Config {
    /// `PARCEL_CONFIG` points at a JSON `LogisticsConfig`; the remaining
    /// knobs come from `PARCEL_*` variables with defaults.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let logistics = match env::var("PARCEL_CONFIG") {
            Ok(path) => load_logistics(Path::new(&path))?,
            Err(_) => defaults.logistics,
        };
        logistics.validate().context("invalid logistics configuration")?;

        Ok(Self {
            logistics,
            event_capacity: env_parse("PARCEL_EVENT_CAPACITY")
                .unwrap_or(defaults.event_capacity)
                .max(1),
            leg_cache_max_entries: env_parse("PARCEL_LEG_CACHE_MAX")
                .unwrap_or(defaults.leg_cache_max_entries),
            leg_cache_ttl: env_parse("PARCEL_LEG_CACHE_TTL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.leg_cache_ttl),
        })
    }
}

/// Read a JSON logistics configuration file. Missing sections take defaults.
pub fn load_logistics(path: &Path) -> Result<LogisticsConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    let config: LogisticsConfig = serde_json::from_str(&raw)
        .with_context(|| format!("parsing config {}", path.display()))?;
    Ok(config)
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|s| s.parse().ok())
}
