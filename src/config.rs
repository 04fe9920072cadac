//! Global configuration parsing and validation.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::{AppError, Result};

/// Upper bound for the spawn timeout ceiling and the heartbeat period.
pub const MAX_TIMER_SECONDS: u64 = 86_400;

/// Upper bound for `crash.max_report_age_days`.
pub const MAX_REPORT_AGE_DAYS: i64 = 3_650;

/// How to launch worker runtime processes.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct WorkerConfig {
    /// Runtime binary started for every worker attempt.
    #[serde(default = "default_worker_command")]
    pub command: PathBuf,
    /// Arguments passed before any launch attributes.
    #[serde(default)]
    pub args: Vec<String>,
    /// Extra environment passed to every worker.
    #[serde(default)]
    pub envs: BTreeMap<String, String>,
    /// Directory workers start in.
    #[serde(default)]
    pub working_directory: Option<PathBuf>,
}

fn default_worker_command() -> PathBuf {
    PathBuf::from("bridge-runtime")
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            command: default_worker_command(),
            args: Vec::new(),
            envs: BTreeMap::new(),
            working_directory: None,
        }
    }
}

/// Spawn timeout and retry policy.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SupervisorConfig {
    /// First spawn timeout; doubled on every retry.
    #[serde(default = "default_spawn_timeout_base")]
    pub spawn_timeout_base_seconds: u64,
    /// Give up once the timeout reaches this value.
    #[serde(default = "default_spawn_timeout_ceiling")]
    pub spawn_timeout_ceiling_seconds: u64,
}

fn default_spawn_timeout_base() -> u64 {
    2
}

fn default_spawn_timeout_ceiling() -> u64 {
    32
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            spawn_timeout_base_seconds: default_spawn_timeout_base(),
            spawn_timeout_ceiling_seconds: default_spawn_timeout_ceiling(),
        }
    }
}

impl SupervisorConfig {
    /// Initial spawn timeout.
    #[must_use]
    pub fn base_timeout(&self) -> Duration {
        Duration::from_secs(self.spawn_timeout_base_seconds)
    }

    /// Timeout at which retries stop.
    #[must_use]
    pub fn ceiling(&self) -> Duration {
        Duration::from_secs(self.spawn_timeout_ceiling_seconds)
    }
}

/// Heartbeat monitor settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct HeartbeatConfig {
    /// Interval between pings.
    #[serde(default = "default_heartbeat_period")]
    pub period_seconds: u64,
}

fn default_heartbeat_period() -> u64 {
    30
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            period_seconds: default_heartbeat_period(),
        }
    }
}

impl HeartbeatConfig {
    /// Interval between pings.
    #[must_use]
    pub fn period(&self) -> Duration {
        Duration::from_secs(self.period_seconds)
    }
}

/// Crash handling and crash-report queue settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct CrashConfig {
    /// Minimum uptime before a crash triggers an automatic relaunch.
    #[serde(default = "default_restart_threshold")]
    pub restart_threshold_seconds: u64,
    /// File pending reports are persisted to across runs.
    #[serde(default)]
    pub queue_path: Option<PathBuf>,
    /// Reports older than this are discarded instead of uploaded.
    #[serde(default = "default_max_report_age_days")]
    pub max_report_age_days: i64,
}

fn default_restart_threshold() -> u64 {
    10
}

fn default_max_report_age_days() -> i64 {
    5
}

impl Default for CrashConfig {
    fn default() -> Self {
        Self {
            restart_threshold_seconds: default_restart_threshold(),
            queue_path: None,
            max_report_age_days: default_max_report_age_days(),
        }
    }
}

impl CrashConfig {
    /// Minimum uptime before a crash triggers an automatic relaunch.
    #[must_use]
    pub fn restart_threshold(&self) -> Duration {
        Duration::from_secs(self.restart_threshold_seconds)
    }

    /// Age past which queued reports are dropped.
    #[must_use]
    pub fn max_report_age(&self) -> chrono::Duration {
        chrono::Duration::days(self.max_report_age_days.clamp(1, MAX_REPORT_AGE_DAYS))
    }
}

/// Host window settings.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct WindowConfig {
    /// Initial window width in host DIPs; defaults to the target width.
    #[serde(default)]
    pub width: Option<u32>,
    /// Initial window height in host DIPs; defaults to the target height.
    #[serde(default)]
    pub height: Option<u32>,
    /// Height of the title bar drawn above the embedded surface.
    #[serde(default = "default_chrome_height")]
    pub chrome_height: u32,
    /// Host device pixel ratio.
    #[serde(default = "default_device_pixel_ratio")]
    pub device_pixel_ratio: f64,
    /// Treat this install as a production install.
    #[serde(default)]
    pub production: bool,
}

fn default_chrome_height() -> u32 {
    32
}

fn default_device_pixel_ratio() -> f64 {
    1.0
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            width: None,
            height: None,
            chrome_height: default_chrome_height(),
            device_pixel_ratio: default_device_pixel_ratio(),
            production: false,
        }
    }
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Worker launch settings.
    #[serde(default)]
    pub worker: WorkerConfig,
    /// Spawn retry policy.
    #[serde(default)]
    pub supervisor: SupervisorConfig,
    /// Heartbeat settings.
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
    /// Crash handling settings.
    #[serde(default)]
    pub crash: CrashConfig,
    /// Host window settings.
    #[serde(default)]
    pub window: WindowConfig,
    /// Free-form application metadata merged over the built-in defaults.
    #[serde(default)]
    pub metadata: toml::Table,
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if self.worker.command.as_os_str().is_empty() {
            return Err(AppError::Config("worker.command must not be empty".into()));
        }

        if self.supervisor.spawn_timeout_base_seconds == 0 {
            return Err(AppError::Config(
                "supervisor.spawn_timeout_base_seconds must be greater than zero".into(),
            ));
        }

        if self.supervisor.spawn_timeout_ceiling_seconds < self.supervisor.spawn_timeout_base_seconds
        {
            return Err(AppError::Config(
                "supervisor.spawn_timeout_ceiling_seconds must not be below the base".into(),
            ));
        }

        if self.supervisor.spawn_timeout_ceiling_seconds > MAX_TIMER_SECONDS {
            return Err(AppError::Config(format!(
                "supervisor.spawn_timeout_ceiling_seconds must not exceed {MAX_TIMER_SECONDS}"
            )));
        }

        if self.heartbeat.period_seconds == 0 {
            return Err(AppError::Config(
                "heartbeat.period_seconds must be greater than zero".into(),
            ));
        }

        if self.heartbeat.period_seconds > MAX_TIMER_SECONDS {
            return Err(AppError::Config(format!(
                "heartbeat.period_seconds must not exceed {MAX_TIMER_SECONDS}"
            )));
        }

        if self.crash.max_report_age_days <= 0 {
            return Err(AppError::Config(
                "crash.max_report_age_days must be greater than zero".into(),
            ));
        }

        if self.crash.max_report_age_days > MAX_REPORT_AGE_DAYS {
            return Err(AppError::Config(format!(
                "crash.max_report_age_days must not exceed {MAX_REPORT_AGE_DAYS}"
            )));
        }

        let dpr = self.window.device_pixel_ratio;
        if !dpr.is_finite() || dpr <= 0.0 {
            return Err(AppError::Config(
                "window.device_pixel_ratio must be a positive number".into(),
            ));
        }

        Ok(())
    }
}
