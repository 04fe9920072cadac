//! Boot-progress state machine.
//!
//! The primary worker reports progress as free-text `logPerfMessage` lines.
//! A handful of fixed substrings move the boot step forward; the step is
//! clamped to [`BootStep::Done`] and never goes backwards.

use std::time::Duration;

use tracing::{debug, error, info};

/// Marker for [`BootStep::InstanceStarted`].
pub const MARKER_INSTANCE_STARTED: &str = "App instance started";
/// Marker for [`BootStep::PackageOptimized`].
pub const MARKER_PACKAGE_OPTIMIZED: &str = "Package dexopted";
/// Marker for [`BootStep::ServerStarted`].
pub const MARKER_SERVER_STARTED: &str = "System server started";
/// Marker for [`BootStep::Done`]; only the first occurrence counts.
pub const MARKER_ON_RESUME: &str = "Activity onResume";

/// How far the primary worker got.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum BootStep {
    /// Nothing happened yet.
    #[default]
    NotInitialized = 0,
    /// The bridge finished its own setup.
    ScriptsInitialized = 1,
    /// The worker's app instance started.
    InstanceStarted = 2,
    /// The package was optimized.
    PackageOptimized = 3,
    /// The worker's system server started.
    ServerStarted = 4,
    /// The app's first activity resumed.
    Done = 5,
}

impl BootStep {
    /// Largest step.
    pub const MAX: Self = Self::Done;

    /// Numeric value.
    #[must_use]
    pub fn value(self) -> u8 {
        self as u8
    }

    /// Step for `value`, clamped to [`BootStep::MAX`].
    #[must_use]
    pub fn clamped(value: u8) -> Self {
        match value {
            0 => Self::NotInitialized,
            1 => Self::ScriptsInitialized,
            2 => Self::InstanceStarted,
            3 => Self::PackageOptimized,
            4 => Self::ServerStarted,
            _ => Self::Done,
        }
    }
}

/// Current boot step plus the first-resume latch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootProgress {
    step: BootStep,
    seen_on_resume: bool,
    on_resume_uptime: Option<Duration>,
}

impl BootProgress {
    /// Current step.
    #[must_use]
    pub fn step(&self) -> BootStep {
        self.step
    }

    /// Whether the first resume was seen.
    #[must_use]
    pub fn has_seen_on_resume(&self) -> bool {
        self.seen_on_resume
    }

    /// Uptime at the first resume.
    #[must_use]
    pub fn on_resume_uptime(&self) -> Option<Duration> {
        self.on_resume_uptime
    }

    /// Move to `value`, clamping to the maximum. Lower values are ignored.
    pub fn set(&mut self, value: u8) -> BootStep {
        if value > BootStep::MAX.value() {
            error!(value, "invalid boot step");
        }
        let next = BootStep::clamped(value);
        if next < self.step {
            debug!(current = ?self.step, requested = ?next, "ignoring out-of-order boot step");
            return self.step;
        }
        self.step = next;
        self.step
    }

    /// Feed one perf log line; returns the new step if a marker matched.
    pub fn observe(&mut self, message: &str, uptime: Duration) -> Option<BootStep> {
        let step = if message.contains(MARKER_INSTANCE_STARTED) {
            BootStep::InstanceStarted
        } else if message.contains(MARKER_PACKAGE_OPTIMIZED) {
            BootStep::PackageOptimized
        } else if message.contains(MARKER_SERVER_STARTED) {
            BootStep::ServerStarted
        } else if message.contains(MARKER_ON_RESUME) {
            if self.seen_on_resume {
                return None;
            }
            self.seen_on_resume = true;
            self.on_resume_uptime = Some(uptime);
            info!(uptime_ms = uptime.as_millis(), "first activity resume");
            BootStep::Done
        } else {
            return None;
        };
        Some(self.set(step.value()))
    }
}
