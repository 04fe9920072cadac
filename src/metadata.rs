//! Application metadata.
//!
//! Built-in defaults are merged with the free-form `[metadata]` table from
//! the config file. Explicit values win; unknown keys, type mismatches and
//! values outside the allowed sets are reported as diagnostics and the
//! default is kept. The merge also computes the density DPI and the target
//! window size for the host's device pixel ratio.

use std::fmt;

use tracing::warn;

use crate::models::descriptor::{join_list, WorkerDescriptor};
use crate::models::namespace;

/// Package name that boots the worker runtime in system mode.
pub const SYSTEM_PACKAGE: &str = "app.worker.system";

/// Density DPI values the worker runtime supports.
pub const SUPPORTED_DENSITY_DPIS: [u32; 8] = [120, 160, 213, 240, 320, 400, 480, 640];

/// Accepted `fps_limit` values.
pub const ALLOWED_FPS_LIMITS: [i64; 5] = [10, 12, 15, 20, 30];

/// Accepted `stderr_log` levels.
pub const ALLOWED_STDERR_LOG: [&str; 7] = ["D", "V", "I", "W", "E", "F", "S"];

/// Accepted `ndk_abi` values.
pub const ALLOWED_NDK_ABI: [&str; 2] = ["armeabi", "armeabi-v7a"];

/// Device class the app targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FormFactor {
    /// 360×640 dp.
    #[default]
    Phone,
    /// 800×1280 dp.
    Tablet,
}

impl FormFactor {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "phone" => Some(Self::Phone),
            "tablet" => Some(Self::Tablet),
            _ => None,
        }
    }

    /// Target size in dp as `(short, long)`.
    #[must_use]
    pub fn target_dp(self) -> (u32, u32) {
        match self {
            Self::Phone => (360, 640),
            Self::Tablet => (800, 1280),
        }
    }
}

/// Initial orientation of the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Orientation {
    /// Taller than wide.
    #[default]
    Portrait,
    /// Wider than tall.
    Landscape,
}

impl Orientation {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "portrait" => Some(Self::Portrait),
            "landscape" => Some(Self::Landscape),
            _ => None,
        }
    }
}

/// Window resize policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResizeMode {
    /// Fixed-size window.
    #[default]
    Disabled,
    /// Window may be resized; the surface is scaled.
    Scale,
}

impl ResizeMode {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "disabled" => Some(Self::Disabled),
            "scale" => Some(Self::Scale),
            _ => None,
        }
    }
}

/// Merged application metadata plus computed values.
#[derive(Debug, Clone, PartialEq)]
pub struct AppMetadata {
    /// Keep running when the worker reports an empty activity stack.
    pub allow_empty_activity_stack: bool,
    /// The app may request rotation.
    pub can_rotate: bool,
    /// Ignore worker requests to toggle the back button.
    pub disable_auto_back_button: bool,
    /// Expose the debug bridge inside the worker.
    pub enable_adb: bool,
    /// Expose the external storage directory.
    pub enable_external_directory: bool,
    /// Check GL errors after every call.
    pub enable_gl_error_check: bool,
    /// Turn wheel events into touch events.
    pub enable_synthesize_touch_events_on_wheel: bool,
    /// Target device class.
    pub form_factor: FormFactor,
    /// Frame rate cap.
    pub fps_limit: i64,
    /// Disables the heartbeat monitor for slow debug builds.
    pub is_slow_debug_run: bool,
    /// Java debugger port; 0 disables it.
    pub jdb_port: i64,
    /// Emit load progress to the log.
    pub log_load_progress: bool,
    /// Delay before launching, in milliseconds.
    pub minimum_launch_delay: i64,
    /// Display name.
    pub name: String,
    /// Native ABI override.
    pub ndk_abi: String,
    /// Initial orientation.
    pub orientation: Orientation,
    /// Package to run.
    pub package_name: String,
    /// Window resize policy.
    pub resize: ResizeMode,
    /// Shell commands run after boot instead of the default launch.
    pub shell: Vec<String>,
    /// Minimum stderr log level forwarded by the worker.
    pub stderr_log: String,
    /// Optional platform services to enable.
    pub use_play_services: Vec<String>,
    /// Throttle the worker while the window is unfocused.
    pub sleep_on_blur: bool,
    /// Computed target width in host DIPs.
    pub width: u32,
    /// Computed target height in host DIPs.
    pub height: u32,
    /// Computed density DPI.
    pub density_dpi: u32,
}

impl Default for AppMetadata {
    fn default() -> Self {
        let mut metadata = Self {
            allow_empty_activity_stack: false,
            can_rotate: false,
            disable_auto_back_button: false,
            enable_adb: false,
            enable_external_directory: false,
            enable_gl_error_check: false,
            enable_synthesize_touch_events_on_wheel: true,
            form_factor: FormFactor::Phone,
            fps_limit: 60,
            is_slow_debug_run: false,
            jdb_port: 0,
            log_load_progress: false,
            minimum_launch_delay: 0,
            name: String::new(),
            ndk_abi: String::new(),
            orientation: Orientation::Portrait,
            package_name: "app.worker".into(),
            resize: ResizeMode::Disabled,
            shell: Vec::new(),
            stderr_log: "S".into(),
            use_play_services: Vec::new(),
            sleep_on_blur: true,
            width: 0,
            height: 0,
            density_dpi: 0,
        };
        metadata.compute(1.0);
        metadata
    }
}

/// One problem found while merging metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataDiagnostic {
    /// The key is not a known metadata field.
    UnknownKey(String),
    /// The value has the wrong TOML type.
    TypeMismatch {
        /// Offending key.
        key: String,
        /// Expected TOML type.
        expected: &'static str,
    },
    /// The value is outside the allowed set.
    InvalidValue {
        /// Offending key.
        key: String,
        /// Rejected value, rendered.
        value: String,
    },
}

impl fmt::Display for MetadataDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownKey(key) => write!(f, "unknown metadata property {key:?}"),
            Self::TypeMismatch { key, expected } => {
                write!(f, "type mismatch of {key:?}: expected {expected}")
            }
            Self::InvalidValue { key, value } => write!(f, "invalid value of {key}: {value}"),
        }
    }
}

/// Per-merge helper collecting diagnostics.
struct Merger {
    diagnostics: Vec<MetadataDiagnostic>,
}

impl Merger {
    fn mismatch(&mut self, key: &str, expected: &'static str) {
        self.diagnostics.push(MetadataDiagnostic::TypeMismatch {
            key: key.to_owned(),
            expected,
        });
    }

    fn invalid(&mut self, key: &str, value: impl fmt::Display) {
        self.diagnostics.push(MetadataDiagnostic::InvalidValue {
            key: key.to_owned(),
            value: value.to_string(),
        });
    }

    fn bool(&mut self, key: &str, value: &toml::Value, slot: &mut bool) {
        match value.as_bool() {
            Some(b) => *slot = b,
            None => self.mismatch(key, "boolean"),
        }
    }

    fn int(&mut self, key: &str, value: &toml::Value, slot: &mut i64) {
        match value.as_integer() {
            Some(i) => *slot = i,
            None => self.mismatch(key, "integer"),
        }
    }

    fn string(&mut self, key: &str, value: &toml::Value, slot: &mut String) {
        match value.as_str() {
            Some(s) => s.clone_into(slot),
            None => self.mismatch(key, "string"),
        }
    }

    fn string_list(&mut self, key: &str, value: &toml::Value, slot: &mut Vec<String>) {
        let parsed = value.as_array().and_then(|items| {
            items
                .iter()
                .map(|v| v.as_str().map(str::to_owned))
                .collect::<Option<Vec<_>>>()
        });
        match parsed {
            Some(list) => *slot = list,
            None => self.mismatch(key, "array of strings"),
        }
    }

    fn choice<T>(
        &mut self,
        key: &str,
        value: &toml::Value,
        parse: impl Fn(&str) -> Option<T>,
        slot: &mut T,
    ) {
        match value.as_str() {
            Some(s) => match parse(s) {
                Some(v) => *slot = v,
                None => self.invalid(key, s),
            },
            None => self.mismatch(key, "string"),
        }
    }
}

impl AppMetadata {
    /// Merge `table` over the defaults for a host with `device_pixel_ratio`.
    ///
    /// Every diagnostic is logged at `WARN` and returned.
    #[must_use]
    pub fn merge(table: &toml::Table, device_pixel_ratio: f64) -> (Self, Vec<MetadataDiagnostic>) {
        let mut m = Self::default();
        let mut merger = Merger {
            diagnostics: Vec::new(),
        };

        for (key, value) in table {
            let k = key.as_str();
            match k {
                "allow_empty_activity_stack" => {
                    merger.bool(k, value, &mut m.allow_empty_activity_stack);
                }
                "can_rotate" => merger.bool(k, value, &mut m.can_rotate),
                "disable_auto_back_button" => {
                    merger.bool(k, value, &mut m.disable_auto_back_button);
                }
                "enable_adb" => merger.bool(k, value, &mut m.enable_adb),
                "enable_external_directory" => {
                    merger.bool(k, value, &mut m.enable_external_directory);
                }
                "enable_gl_error_check" => merger.bool(k, value, &mut m.enable_gl_error_check),
                "enable_synthesize_touch_events_on_wheel" => {
                    merger.bool(k, value, &mut m.enable_synthesize_touch_events_on_wheel);
                }
                "form_factor" => merger.choice(k, value, FormFactor::parse, &mut m.form_factor),
                "fps_limit" => {
                    let mut fps = m.fps_limit;
                    merger.int(k, value, &mut fps);
                    if ALLOWED_FPS_LIMITS.contains(&fps) {
                        m.fps_limit = fps;
                    } else if fps != m.fps_limit {
                        merger.invalid(k, fps);
                    }
                }
                "is_slow_debug_run" => merger.bool(k, value, &mut m.is_slow_debug_run),
                "jdb_port" => merger.int(k, value, &mut m.jdb_port),
                "log_load_progress" => merger.bool(k, value, &mut m.log_load_progress),
                "minimum_launch_delay" => merger.int(k, value, &mut m.minimum_launch_delay),
                "name" => merger.string(k, value, &mut m.name),
                "ndk_abi" => {
                    let mut abi = m.ndk_abi.clone();
                    merger.string(k, value, &mut abi);
                    if ALLOWED_NDK_ABI.contains(&abi.as_str()) {
                        m.ndk_abi = abi;
                    } else if abi != m.ndk_abi {
                        merger.invalid(k, abi);
                    }
                }
                "orientation" => merger.choice(k, value, Orientation::parse, &mut m.orientation),
                "package_name" => merger.string(k, value, &mut m.package_name),
                "resize" => merger.choice(k, value, ResizeMode::parse, &mut m.resize),
                "shell" => merger.string_list(k, value, &mut m.shell),
                "stderr_log" => {
                    let mut level = m.stderr_log.clone();
                    merger.string(k, value, &mut level);
                    if ALLOWED_STDERR_LOG.contains(&level.as_str()) {
                        m.stderr_log = level;
                    } else if level != m.stderr_log {
                        merger.invalid(k, level);
                    }
                }
                "use_play_services" => merger.string_list(k, value, &mut m.use_play_services),
                "sleep_on_blur" => merger.bool(k, value, &mut m.sleep_on_blur),
                _ => merger
                    .diagnostics
                    .push(MetadataDiagnostic::UnknownKey(key.clone())),
            }
        }

        for diagnostic in &merger.diagnostics {
            warn!(%diagnostic, "metadata");
        }

        m.compute(device_pixel_ratio);
        (m, merger.diagnostics)
    }

    /// Fill in density and target size for `device_pixel_ratio`.
    fn compute(&mut self, device_pixel_ratio: f64) {
        self.density_dpi = density_dpi(self.form_factor, device_pixel_ratio);
        let (short_dp, long_dp) = self.form_factor.target_dp();
        let short = dp_to_dip(short_dp, self.density_dpi, device_pixel_ratio);
        let long = dp_to_dip(long_dp, self.density_dpi, device_pixel_ratio);
        (self.width, self.height) = match self.orientation {
            Orientation::Landscape => (long, short),
            Orientation::Portrait => (short, long),
        };
    }

    /// Commands the worker runs once booted.
    #[must_use]
    pub fn shell_commands(&self) -> Vec<String> {
        if self.package_name == SYSTEM_PACKAGE {
            return ["echo", "Start system mode", ";"].map(str::to_owned).to_vec();
        }
        if !self.shell.is_empty() {
            return self.shell.clone();
        }
        ["echo", "Start running", ";", "start", "$launch", ";"]
            .map(str::to_owned)
            .to_vec()
    }

    /// Launch attributes shared by every worker.
    #[must_use]
    pub fn shared_attributes(&self) -> Vec<(String, String)> {
        let attrs = [
            ("BRIDGE_PACKAGE_NAME", self.package_name.clone()),
            ("BRIDGE_STDERR_LOG", self.stderr_log.clone()),
            ("BRIDGE_APP_WIDTH", self.width.to_string()),
            ("BRIDGE_APP_HEIGHT", self.height.to_string()),
            ("BRIDGE_DENSITY_DPI", self.density_dpi.to_string()),
            ("BRIDGE_NDK_ABI", self.ndk_abi.clone()),
            ("BRIDGE_ENABLE_ADB", self.enable_adb.to_string()),
            ("BRIDGE_ENABLE_GL_ERROR_CHECK", self.enable_gl_error_check.to_string()),
            (
                "BRIDGE_SYNTHESIZE_TOUCH_ON_WHEEL",
                self.enable_synthesize_touch_events_on_wheel.to_string(),
            ),
            ("BRIDGE_ENABLE_EXTERNAL_DIRECTORY", self.enable_external_directory.to_string()),
            ("BRIDGE_FPS_LIMIT", self.fps_limit.to_string()),
            ("BRIDGE_LOG_LOAD_PROGRESS", self.log_load_progress.to_string()),
            ("BRIDGE_JDB_PORT", self.jdb_port.to_string()),
            ("BRIDGE_SLEEP_ON_BLUR", self.sleep_on_blur.to_string()),
            ("BRIDGE_USE_PLAY_SERVICES", self.use_play_services.join(" ")),
            ("BRIDGE_SHELL", join_list(self.shell_commands().iter().map(Some))),
        ];
        attrs
            .into_iter()
            .map(|(k, v)| (k.to_owned(), v))
            .collect()
    }

    /// Descriptor for the primary worker.
    #[must_use]
    pub fn primary_descriptor(&self) -> WorkerDescriptor {
        WorkerDescriptor {
            plugin: "app".into(),
            args: Vec::new(),
            envs: None,
            cwd: None,
            preopened: None,
            requester: namespace::RUNTIME.into(),
            request_id: 0,
        }
    }
}

/// Supported density nearest to `160 × device_pixel_ratio` (×0.75 on tablets).
#[must_use]
pub fn density_dpi(form_factor: FormFactor, device_pixel_ratio: f64) -> u32 {
    let mut optimal = 160.0 * device_pixel_ratio;
    if form_factor == FormFactor::Tablet {
        optimal *= 0.75;
    }
    let mut best = SUPPORTED_DENSITY_DPIS[0];
    let mut best_delta = f64::INFINITY;
    for dpi in SUPPORTED_DENSITY_DPIS {
        let delta = (f64::from(dpi) - optimal).abs();
        if delta < best_delta {
            best = dpi;
            best_delta = delta;
        }
    }
    best
}

/// Convert worker dp to host DIPs, rounding up.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)] // bounded by the dp table
pub fn dp_to_dip(dp: u32, density_dpi: u32, device_pixel_ratio: f64) -> u32 {
    let scale = f64::from(density_dpi) / 160.0;
    let px = f64::from(dp) * scale;
    (px / device_pixel_ratio).ceil() as u32
}
