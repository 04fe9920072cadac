//! Crash-report queue.
//!
//! Collects crash reports from every worker and hands them to a
//! [`CrashUploader`] once the user's crash-reporting setting is known.
//! Reports produced before that are kept in memory and persisted to a JSON
//! file on shutdown; the next run reloads them in [`CrashQueue::init`].

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::time::Instant;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{AppError, Result};

/// User setting for crash uploads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportingSetting {
    /// Not reported by the worker yet; reports are queued.
    Unknown,
    /// Uploads are disabled; reports are dropped.
    Disabled,
    /// Uploads are enabled.
    Enabled,
}

/// One crash report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrashReport {
    /// Report identifier.
    pub id: Uuid,
    /// What happened.
    pub message: String,
    /// When it happened.
    pub crash_time: DateTime<Utc>,
    /// Milliseconds since the queue started.
    pub uptime_ms: u64,
    /// App display name.
    pub app_name: String,
    /// App package name.
    pub package_name: String,
    /// Opaque crash payload, base64 on disk.
    #[serde(default, with = "minidump_base64")]
    pub minidump: Option<Vec<u8>>,
    /// Window state and worker-provided diagnostics.
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

mod minidump_base64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    #[allow(clippy::ref_option)] // signature required by `serde(with)`
    pub fn serialize<S: Serializer>(value: &Option<Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(bytes) => s.serialize_some(&STANDARD.encode(bytes)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<u8>>, D::Error> {
        let encoded: Option<String> = Option::deserialize(d)?;
        encoded
            .map(|e| STANDARD.decode(e).map_err(serde::de::Error::custom))
            .transpose()
    }
}

/// Delivers crash reports to a collection service.
pub trait CrashUploader: Send {
    /// Upload one report, returning the server-side id.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::CrashQueue`] when the upload fails.
    fn upload(&mut self, report: &CrashReport) -> Result<String>;
}

/// Uploader that only logs; used when no collection service is configured.
#[derive(Debug, Default)]
pub struct LoggingUploader;

impl CrashUploader for LoggingUploader {
    fn upload(&mut self, report: &CrashReport) -> Result<String> {
        info!(id = %report.id, message = report.message, "crash report ready for upload");
        Ok(report.id.to_string())
    }
}

/// Queue settings.
#[derive(Debug, Clone)]
pub struct CrashQueueOptions {
    /// File pending reports are persisted to.
    pub path: Option<PathBuf>,
    /// Reports older than this are dropped.
    pub max_age: chrono::Duration,
    /// Only production installs upload.
    pub production: bool,
    /// App display name stamped on every report.
    pub app_name: String,
    /// App package name stamped on every report.
    pub package_name: String,
}

/// Crash-report queue; see the module docs.
pub struct CrashQueue {
    options: CrashQueueOptions,
    setting: ReportingSetting,
    pending: Vec<CrashReport>,
    received: Vec<String>,
    did_read_storage: bool,
    started: Instant,
    uploader: Box<dyn CrashUploader>,
}

impl CrashQueue {
    /// Create an empty queue.
    #[must_use]
    pub fn new(options: CrashQueueOptions, uploader: Box<dyn CrashUploader>) -> Self {
        Self {
            options,
            setting: ReportingSetting::Unknown,
            pending: Vec::new(),
            received: Vec::new(),
            did_read_storage: false,
            started: Instant::now(),
            uploader,
        }
    }

    /// Load reports persisted by a previous run, then flush if possible.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::CrashQueue`] if the persisted file exists but
    /// cannot be read or parsed. The file is removed either way.
    pub fn init(&mut self) -> Result<()> {
        self.started = Instant::now();
        let loaded = self.read_storage();
        self.did_read_storage = true;
        self.flush();
        loaded
    }

    /// Build a report and queue, drop or upload it.
    pub fn report(
        &mut self,
        message: &str,
        minidump: Option<Vec<u8>>,
        extra: BTreeMap<String, String>,
    ) -> Uuid {
        let report = CrashReport {
            id: Uuid::new_v4(),
            message: message.to_owned(),
            crash_time: Utc::now(),
            uptime_ms: u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX),
            app_name: self.options.app_name.clone(),
            package_name: self.options.package_name.clone(),
            minidump,
            extra,
        };
        let id = report.id;
        self.received.push(report.message.clone());

        info!(
            id = %id,
            message,
            uptime_ms = report.uptime_ms,
            extra = ?report.extra,
            has_minidump = report.minidump.is_some(),
            "received a crash"
        );

        if self.options.production {
            self.send(report);
        } else {
            info!("not a production install, not sending crash report");
            if let Some(dump) = &report.minidump {
                error!(minidump = %STANDARD.encode(dump), "minidump generated");
            }
        }
        id
    }

    /// Record the user's setting and flush anything queued.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.setting = if enabled {
            ReportingSetting::Enabled
        } else {
            ReportingSetting::Disabled
        };
        self.flush();
    }

    /// Persist pending reports if the setting never arrived.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::CrashQueue`] when the file cannot be written.
    pub fn shut_down(&mut self) -> Result<()> {
        if self.setting != ReportingSetting::Unknown || self.pending.is_empty() {
            return Ok(());
        }
        if !self.did_read_storage {
            if let Err(e) = self.read_storage() {
                warn!(error = %e, "discarding unreadable crash queue file");
            }
            self.did_read_storage = true;
        }
        self.write_storage()
    }

    /// Current setting.
    #[must_use]
    pub fn setting(&self) -> ReportingSetting {
        self.setting
    }

    /// Messages of every report received this run, in order.
    #[must_use]
    pub fn received(&self) -> &[String] {
        &self.received
    }

    /// Reports waiting for the setting.
    #[must_use]
    pub fn pending(&self) -> &[CrashReport] {
        &self.pending
    }

    fn flush(&mut self) {
        if self.setting == ReportingSetting::Unknown {
            return;
        }
        for report in std::mem::take(&mut self.pending) {
            self.send(report);
        }
    }

    fn send(&mut self, report: CrashReport) {
        match self.setting {
            ReportingSetting::Unknown => self.pending.push(report),
            ReportingSetting::Disabled => {
                info!(id = %report.id, "crash reporting not enabled, dropping report");
            }
            ReportingSetting::Enabled => {
                if Utc::now() - report.crash_time > self.options.max_age {
                    info!(id = %report.id, "crash report too old, dropping");
                    return;
                }
                match self.uploader.upload(&report) {
                    Ok(server_id) => info!(id = %report.id, server_id, "uploaded crash report"),
                    Err(e) => warn!(id = %report.id, error = %e, "failed to upload crash report"),
                }
            }
        }
    }

    fn read_storage(&mut self) -> Result<()> {
        let Some(path) = &self.options.path else {
            return Ok(());
        };
        if !path.exists() {
            return Ok(());
        }
        let raw = fs::read_to_string(path);
        if let Err(e) = fs::remove_file(path) {
            warn!(path = %path.display(), error = %e, "failed to remove crash queue file");
        }
        let raw = raw.map_err(|e| AppError::CrashQueue(format!("failed to read queue: {e}")))?;
        let stored: Vec<CrashReport> = serde_json::from_str(&raw)
            .map_err(|e| AppError::CrashQueue(format!("failed to parse queue: {e}")))?;
        info!(count = stored.len(), "loaded pending crash reports");
        self.pending.extend(stored);
        Ok(())
    }

    fn write_storage(&self) -> Result<()> {
        let Some(path) = &self.options.path else {
            return Ok(());
        };
        let raw = serde_json::to_string(&self.pending)
            .map_err(|e| AppError::CrashQueue(format!("failed to encode queue: {e}")))?;
        fs::write(path, raw)
            .map_err(|e| AppError::CrashQueue(format!("failed to write queue: {e}")))?;
        info!(count = self.pending.len(), path = %path.display(), "persisted pending crash reports");
        Ok(())
    }
}
