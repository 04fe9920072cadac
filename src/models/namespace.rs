//! Wire namespace names shared with the worker runtime.
//!
//! These strings are part of the message protocol and must match what the
//! worker runtime registers and emits.

/// Worker → host control traffic (`loadResult`, `logPerfMessage`, ...).
pub const RUNTIME: &str = "runtime";

/// Display configuration (rotation, back button, GPU support).
pub const DISPLAY: &str = "display";

/// Liveness probe (`ping` out, `pong` in).
pub const HEARTBEAT: &str = "heartbeat";

/// Browser actions such as opening a URL.
pub const BROWSER: &str = "browser";

/// System lifecycle requests (reboot, shut down, crash reporting).
pub const SYSTEM: &str = "system";

/// Host clipboard access.
pub const CLIPBOARD: &str = "clipboard";

/// Child process requests arriving from a worker (`spawn`, `stdout`, ...).
pub const CHILD_PROCESS: &str = "childProcess";

/// Worker-side namespace that receives relayed child stdout/stderr.
pub const WORKER_CHILD_PROCESS: &str = "workerChildProcess";

/// Audio/video capture requests.
pub const MEDIA: &str = "mediaStream";

/// Host → worker namespace announcements.
pub const MESSAGE_PROXY: &str = "messageProxy";

/// Namespaces the lifecycle controller registers for itself.
pub const INTERNAL: [&str; 7] = [
    DISPLAY,
    HEARTBEAT,
    BROWSER,
    SYSTEM,
    CLIPBOARD,
    CHILD_PROCESS,
    MEDIA,
];
