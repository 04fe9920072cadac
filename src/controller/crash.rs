//! Crash diagnostics and the single-shot shutdown report.

use std::collections::BTreeMap;
use std::time::Duration;

use tracing::info;

use crate::controller::boot::BootStep;
use crate::host::WindowHost;

/// Extra diagnostics reported by the worker ahead of a crash.
///
/// A field reported twice (two threads crashing together, say) keeps both
/// values joined with `\n`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrashExtras {
    fields: BTreeMap<String, String>,
}

impl CrashExtras {
    /// Merge newly reported fields.
    pub fn merge(&mut self, fields: impl IntoIterator<Item = (String, String)>) {
        for (key, value) in fields {
            self.fields
                .entry(key)
                .and_modify(|existing| {
                    existing.push('\n');
                    existing.push_str(&value);
                })
                .or_insert_with(|| value.clone());
        }
    }

    /// Hand out and clear the accumulated fields.
    pub fn take(&mut self) -> BTreeMap<String, String> {
        std::mem::take(&mut self.fields)
    }

    /// Peek at the accumulated fields.
    #[must_use]
    pub fn fields(&self) -> &BTreeMap<String, String> {
        &self.fields
    }
}

/// Window state attached to every crash report.
#[must_use]
pub fn window_diagnostics(window: &dyn WindowHost) -> BTreeMap<String, String> {
    let bounds = window.bounds();
    BTreeMap::from([
        ("width".to_owned(), bounds.width.to_string()),
        ("height".to_owned(), bounds.height.to_string()),
        ("is_minimized".to_owned(), window.is_minimized().to_string()),
        ("is_maximized".to_owned(), window.is_maximized().to_string()),
        ("is_fullscreen".to_owned(), window.is_fullscreen().to_string()),
    ])
}

/// Shutdown statistics, reported once per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownReport {
    /// The shutdown was caused by a crash.
    pub is_crash: bool,
    /// Time since the controller started.
    pub uptime: Duration,
    /// Boot step reached before shutting down.
    pub last_boot_step: BootStep,
}

/// Latch making the shutdown report single-shot across close and crash.
#[derive(Debug, Clone, Default)]
pub struct ShutdownLatch {
    report: Option<ShutdownReport>,
}

impl ShutdownLatch {
    /// Record the shutdown; returns the report only the first time.
    pub fn report(
        &mut self,
        is_crash: bool,
        uptime: Duration,
        last_boot_step: BootStep,
    ) -> Option<ShutdownReport> {
        if self.report.is_some() {
            return None;
        }
        let report = ShutdownReport {
            is_crash,
            uptime,
            last_boot_step,
        };
        info!(
            is_crash,
            uptime_ms = uptime.as_millis(),
            last_boot_step = last_boot_step.value(),
            "app shutdown"
        );
        self.report = Some(report);
        Some(report)
    }

    /// The recorded report, if any.
    #[must_use]
    pub fn recorded(&self) -> Option<ShutdownReport> {
        self.report
    }
}
