use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::NaiveTime;
use config::{Config, Environment, File};
use serde::Deserialize;

pub const DEFAULT_CONFIG_FILE: &str = "hal_prices.toml";

/// Runtime configuration: built-in defaults, then an optional TOML file,
/// then `HAL_*` environment variables (`HAL_DB_PATH`, `HAL_REFRESH_MINUTES`).
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub db_path: PathBuf,
    pub rules_path: PathBuf,
    pub markets_path: PathBuf,
    pub cache_dir: PathBuf,
    pub export_dir: PathBuf,
    pub backup_dir: PathBuf,
    pub backup_retention_days: i64,
    pub refresh_minutes: u64,
    /// Local time of the daily backup, `HH:MM`.
    pub backup_at: String,
    pub bind_addr: String,
    pub fetch_timeout_secs: u64,
}

impl Settings {
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let file = file.unwrap_or(Path::new(DEFAULT_CONFIG_FILE));
        let settings: Settings = Config::builder()
            .set_default("db_path", "data/hal_prices.sqlite")?
            .set_default("rules_path", "kategoriler.csv")?
            .set_default("markets_path", "backend/market_coords.json")?
            .set_default("cache_dir", "data/cache")?
            .set_default("export_dir", "exports")?
            .set_default("backup_dir", "backups")?
            .set_default("backup_retention_days", 30_i64)?
            .set_default("refresh_minutes", 10_i64)?
            .set_default("backup_at", "16:00")?
            .set_default("bind_addr", "0.0.0.0:5000")?
            .set_default("fetch_timeout_secs", 10_i64)?
            .add_source(File::from(file.to_path_buf()).required(false))
            .add_source(Environment::with_prefix("HAL"))
            .build()
            .context("loading configuration")?
            .try_deserialize()
            .context("invalid configuration")?;
        settings.backup_time()?;
        Ok(settings)
    }

    pub fn backup_time(&self) -> Result<NaiveTime> {
        NaiveTime::parse_from_str(&self.backup_at, "%H:%M")
            .with_context(|| format!("backup_at must be HH:MM, got {:?}", self.backup_at))
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_minutes.max(1) * 60)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}
