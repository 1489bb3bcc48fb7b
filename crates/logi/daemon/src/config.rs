//! Configuration for logid

use crate::error::{DaemonError, DaemonResult};
use chrono::Weekday;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main daemon configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogiConfig {
    /// Ledger storage
    #[serde(default)]
    pub storage: StorageConfig,

    /// Periodic tasks
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Dashboard rendering
    #[serde(default)]
    pub display: DisplayConfig,

    /// Audit log delivery
    #[serde(default)]
    pub audit: AuditConfig,

    /// War archive bundles
    #[serde(default)]
    pub archive: ArchiveConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding one JSON document per ledger table
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

/// Scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Decay tick interval in seconds
    #[serde(default = "default_decay_interval")]
    pub decay_interval_secs: u64,

    /// Dashboard reconciliation interval in seconds
    #[serde(default = "default_display_interval")]
    pub display_interval_secs: u64,

    /// Audit buffer flush interval in seconds
    #[serde(default = "default_audit_flush_interval")]
    pub audit_flush_interval_secs: u64,

    /// Day the weekly leaderboard closes, e.g. "sunday"
    #[serde(default = "default_reset_weekday")]
    pub leaderboard_reset_weekday: String,

    /// UTC hour the weekly leaderboard closes
    #[serde(default = "default_reset_hour")]
    pub leaderboard_reset_hour: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            decay_interval_secs: default_decay_interval(),
            display_interval_secs: default_display_interval(),
            audit_flush_interval_secs: default_audit_flush_interval(),
            leaderboard_reset_weekday: default_reset_weekday(),
            leaderboard_reset_hour: default_reset_hour(),
        }
    }
}

impl SchedulerConfig {
    pub fn decay_interval(&self) -> Duration {
        Duration::from_secs(self.decay_interval_secs)
    }

    pub fn display_interval(&self) -> Duration {
        Duration::from_secs(self.display_interval_secs)
    }

    pub fn audit_flush_interval(&self) -> Duration {
        Duration::from_secs(self.audit_flush_interval_secs)
    }

    pub fn reset_weekday(&self) -> DaemonResult<Weekday> {
        self.leaderboard_reset_weekday.parse().map_err(|_| {
            DaemonError::Config(format!(
                "Invalid leaderboard reset weekday: {}",
                self.leaderboard_reset_weekday
            ))
        })
    }
}

/// Dashboard configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplayConfig {
    /// Tunnel rows per dashboard page
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Bound on every display call in seconds
    #[serde(default = "default_io_timeout")]
    pub io_timeout_secs: u64,

    /// Directory the file surface renders dashboards into
    #[serde(default = "default_surface_dir")]
    pub surface_dir: PathBuf,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            io_timeout_secs: default_io_timeout(),
            surface_dir: default_surface_dir(),
        }
    }
}

impl DisplayConfig {
    pub fn io_timeout(&self) -> Duration {
        Duration::from_secs(self.io_timeout_secs)
    }
}

/// Audit log configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Append audit lines to this file in addition to the log output
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

/// Archive configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveConfig {
    /// Directory that receives one sub-directory per archived war
    #[serde(default = "default_archive_dir")]
    pub dir: PathBuf,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            dir: default_archive_dir(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// JSON format
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// Default value helpers
fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_decay_interval() -> u64 {
    120
}

fn default_display_interval() -> u64 {
    120
}

fn default_audit_flush_interval() -> u64 {
    300
}

fn default_reset_weekday() -> String {
    "sunday".to_string()
}

fn default_reset_hour() -> u32 {
    12
}

fn default_page_size() -> usize {
    8
}

fn default_io_timeout() -> u64 {
    10
}

fn default_surface_dir() -> PathBuf {
    PathBuf::from("data/surfaces")
}

fn default_archive_dir() -> PathBuf {
    PathBuf::from("data/archives")
}

fn default_log_level() -> String {
    "info".to_string()
}

impl LogiConfig {
    /// Load configuration: defaults, then the optional file, then `LOGI_`
    /// environment variables (`LOGI_SCHEDULER__DECAY_INTERVAL_SECS=60`)
    pub fn load(path: Option<&str>) -> DaemonResult<Self> {
        let mut builder = config::Config::builder();

        // Add default configuration
        builder = builder.add_source(config::Config::try_from(&LogiConfig::default())?);

        // Add file configuration if provided
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("LOGI")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: LogiConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the scheduler cannot run with
    pub fn validate(&self) -> DaemonResult<()> {
        let scheduler = &self.scheduler;
        for (name, secs) in [
            ("decay_interval_secs", scheduler.decay_interval_secs),
            ("display_interval_secs", scheduler.display_interval_secs),
            ("audit_flush_interval_secs", scheduler.audit_flush_interval_secs),
            ("io_timeout_secs", self.display.io_timeout_secs),
        ] {
            if secs == 0 {
                return Err(DaemonError::Config(format!("{} must be > 0", name)));
            }
        }
        if scheduler.leaderboard_reset_hour > 23 {
            return Err(DaemonError::Config(format!(
                "leaderboard_reset_hour must be 0-23, got {}",
                scheduler.leaderboard_reset_hour
            )));
        }
        scheduler.reset_weekday()?;
        if self.display.page_size == 0 {
            return Err(DaemonError::Config("page_size must be > 0".to_string()));
        }
        Ok(())
    }
}
