//! Message envelope and typed per-namespace commands.
//!
//! Every message crossing a worker transport is an [`Envelope`]: a namespace,
//! a command and a loosely-typed `data` payload. Inbound envelopes addressed
//! to a namespace the bridge owns are parsed into one of the command enums
//! below so the dispatch boundary can match exhaustively.
//!
//! Each `parse` function follows the same contract:
//!
//! - `Ok(Some(cmd))`: recognised command with a well-formed payload.
//! - `Ok(None)`: unknown command for this namespace (callers log and drop).
//! - `Err(AppError::Protocol(..))`: recognised command, malformed payload.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::models::descriptor::SpawnRequest;
use crate::models::namespace;
use crate::{AppError, Result};

// ── Envelope ─────────────────────────────────────────────────────────────────

/// A single namespaced message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Logical channel the message belongs to.
    pub namespace: String,
    /// Command within the namespace.
    pub command: String,
    /// Command payload; `null` when absent on the wire.
    #[serde(default)]
    pub data: Value,
}

impl Envelope {
    /// Build an envelope from its parts.
    #[must_use]
    pub fn new(namespace: impl Into<String>, command: impl Into<String>, data: Value) -> Self {
        Self {
            namespace: namespace.into(),
            command: command.into(),
            data,
        }
    }

    /// Outbound heartbeat probe.
    #[must_use]
    pub fn ping() -> Self {
        Self::new(namespace::HEARTBEAT, "ping", json!({}))
    }

    /// Exit notification addressed to `requester`.
    ///
    /// `result == -1` denotes abnormal termination (timeout exhaustion or
    /// crash).
    #[must_use]
    pub fn exit(requester: &str, request_id: i64, result: i64) -> Self {
        Self::new(
            requester,
            "exit",
            json!({
                "requestid": request_id,
                "requester": requester,
                "result": result,
            }),
        )
    }

    /// Announce namespaces the host is listening on.
    #[must_use]
    pub fn register_namespaces(namespaces: &[String]) -> Self {
        Self::new(
            namespace::MESSAGE_PROXY,
            "registerNamespaces",
            json!({ "namespaces": namespaces }),
        )
    }

    /// Structured failure returned to the requester of a host service call.
    #[must_use]
    pub fn service_error(namespace: &str, command: &str, error: &str) -> Self {
        Self::new(
            namespace,
            "error",
            json!({ "command": command, "error": error }),
        )
    }

    /// Read `data.result` as an integer exit code, if present.
    #[must_use]
    pub fn exit_code(&self) -> Option<i64> {
        self.data.get("result").and_then(Value::as_i64)
    }
}

/// Deserialize a command payload, mapping failures to a protocol error.
fn params<T: for<'de> Deserialize<'de>>(env: &Envelope) -> Result<T> {
    serde_json::from_value(env.data.clone()).map_err(|e| {
        AppError::Protocol(format!(
            "missing required field: {}/{} params: {e}",
            env.namespace, env.command
        ))
    })
}

// ── runtime ──────────────────────────────────────────────────────────────────

/// Control traffic from a worker's runtime layer.
#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeCommand {
    /// The worker finished (or failed) loading.
    LoadResult {
        /// `true` when the worker is up.
        result: bool,
    },
    /// Free-text performance log line; carries boot markers.
    LogPerfMessage {
        /// Log text.
        message: String,
        /// Suppress echoing the line to the host log.
        suppression: bool,
    },
    /// Extra crash diagnostics to attach to the next crash report.
    CrashExtraInformation(Vec<(String, String)>),
    /// The worker hit an unhandled exception and asks for a crash report.
    ReportCrash,
    /// Crash log line; only meaningful to the primary worker's log.
    CrashLogMessage,
}

#[derive(Debug, Deserialize)]
struct LoadResultParams {
    result: bool,
}

#[derive(Debug, Deserialize)]
struct PerfParams {
    message: String,
    #[serde(default)]
    suppression: bool,
}

impl RuntimeCommand {
    /// Parse a `runtime` envelope.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Protocol`] when a known command has a malformed payload.
    pub fn parse(env: &Envelope) -> Result<Option<Self>> {
        let cmd = match env.command.as_str() {
            "loadResult" => {
                let p: LoadResultParams = params(env)?;
                Self::LoadResult { result: p.result }
            }
            "logPerfMessage" => {
                let p: PerfParams = params(env)?;
                Self::LogPerfMessage {
                    message: p.message,
                    suppression: p.suppression,
                }
            }
            "crashExtraInformation" => {
                let fields: Map<String, Value> = params(env)?;
                Self::CrashExtraInformation(
                    fields
                        .into_iter()
                        .map(|(k, v)| (k, value_to_text(v)))
                        .collect(),
                )
            }
            "reportCrash" => Self::ReportCrash,
            "crashLogMessage" => Self::CrashLogMessage,
            _ => return Ok(None),
        };
        Ok(Some(cmd))
    }
}

/// Render a JSON value as diagnostic text; strings are kept verbatim.
fn value_to_text(value: Value) -> String {
    match value {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

// ── display ──────────────────────────────────────────────────────────────────

/// Display configuration requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayCommand {
    /// New display rotation in degrees.
    Config {
        /// Requested rotation; only right angles are honoured.
        rotation: i64,
    },
    /// Toggle the back button in the window chrome.
    SetBackButtonUiEnabled {
        /// Desired state.
        enable: bool,
    },
    /// The worker found no usable GPU.
    ShowNoGpu,
}

#[derive(Debug, Deserialize)]
struct RotationParams {
    rotation: i64,
}

#[derive(Debug, Deserialize)]
struct EnableParams {
    enable: bool,
}

impl DisplayCommand {
    /// Parse a `display` envelope.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Protocol`] when a known command has a malformed payload.
    pub fn parse(env: &Envelope) -> Result<Option<Self>> {
        let cmd = match env.command.as_str() {
            "config" => {
                let p: RotationParams = params(env)?;
                Self::Config {
                    rotation: p.rotation,
                }
            }
            "setBackButtonUIEnabled" => {
                let p: EnableParams = params(env)?;
                Self::SetBackButtonUiEnabled { enable: p.enable }
            }
            "showNoGpu" => Self::ShowNoGpu,
            _ => return Ok(None),
        };
        Ok(Some(cmd))
    }
}

// ── heartbeat ────────────────────────────────────────────────────────────────

/// Heartbeat replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatCommand {
    /// Answer to the last `ping`.
    Pong,
}

impl HeartbeatCommand {
    /// Parse a `heartbeat` envelope.
    ///
    /// # Errors
    ///
    /// Never fails today; the signature matches the other namespaces.
    pub fn parse(env: &Envelope) -> Result<Option<Self>> {
        Ok(match env.command.as_str() {
            "pong" => Some(Self::Pong),
            _ => None,
        })
    }
}

// ── browser ──────────────────────────────────────────────────────────────────

/// Browser actions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrowserCommand {
    /// Open a URL in the host browser.
    OpenUrl {
        /// Target URL.
        url: String,
    },
}

#[derive(Debug, Deserialize)]
struct OpenUrlParams {
    data: String,
}

impl BrowserCommand {
    /// Parse a `browser` envelope.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Protocol`] when `openUrl` lacks its URL.
    pub fn parse(env: &Envelope) -> Result<Option<Self>> {
        Ok(match env.command.as_str() {
            "openUrl" => {
                let p: OpenUrlParams = params(env)?;
                Some(Self::OpenUrl { url: p.data })
            }
            _ => None,
        })
    }
}

// ── system ───────────────────────────────────────────────────────────────────

/// System lifecycle requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemCommand {
    /// Close the window and reload the whole bridge.
    Reboot,
    /// Close the window.
    ShutDown,
    /// The worker has no foreground activity left.
    ActivityStackEmpty,
    /// User setting for crash uploads.
    EnableCrashReporting {
        /// Whether uploads are allowed.
        enabled: bool,
    },
}

#[derive(Debug, Deserialize)]
struct EnabledParams {
    enabled: bool,
}

impl SystemCommand {
    /// Parse a `system` envelope.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Protocol`] when `enableCrashReporting` lacks its flag.
    pub fn parse(env: &Envelope) -> Result<Option<Self>> {
        let cmd = match env.command.as_str() {
            "reboot" => Self::Reboot,
            "shutDown" => Self::ShutDown,
            "activityStackEmpty" => Self::ActivityStackEmpty,
            "enableCrashReporting" => {
                let p: EnabledParams = params(env)?;
                Self::EnableCrashReporting { enabled: p.enabled }
            }
            _ => return Ok(None),
        };
        Ok(Some(cmd))
    }
}

// ── clipboard ────────────────────────────────────────────────────────────────

/// Clipboard requests; the payload is opaque to the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClipboardCommand {
    /// Copy worker clipboard contents to the host.
    PushHost,
    /// Fetch host clipboard contents for the worker.
    PullHost,
}

impl ClipboardCommand {
    /// Parse a `clipboard` envelope.
    ///
    /// # Errors
    ///
    /// Never fails today; the payload is forwarded untouched.
    pub fn parse(env: &Envelope) -> Result<Option<Self>> {
        Ok(match env.command.as_str() {
            "pushhost" => Some(Self::PushHost),
            "pullhost" => Some(Self::PullHost),
            _ => None,
        })
    }
}

// ── childProcess ─────────────────────────────────────────────────────────────

/// Child process traffic.
#[derive(Debug, Clone, PartialEq)]
pub enum ChildProcessCommand {
    /// Start a new worker.
    Spawn(SpawnRequest),
    /// Standard output from a child worker.
    Stdout,
    /// Standard error from a child worker.
    Stderr,
    /// A child worker finished.
    Exit,
}

impl ChildProcessCommand {
    /// Parse a `childProcess` envelope.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Protocol`] when a `spawn` request is malformed.
    pub fn parse(env: &Envelope) -> Result<Option<Self>> {
        let cmd = match env.command.as_str() {
            "spawn" => Self::Spawn(params(env)?),
            "stdout" => Self::Stdout,
            "stderr" => Self::Stderr,
            "exit" => Self::Exit,
            _ => return Ok(None),
        };
        Ok(Some(cmd))
    }
}

// ── mediaStream ──────────────────────────────────────────────────────────────

/// Kind of capture track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    /// Microphone.
    Audio,
    /// Camera.
    Video,
}

impl MediaKind {
    /// Wire prefix used in command names (`audioOpenCall`, ...).
    #[must_use]
    pub fn prefix(self) -> &'static str {
        match self {
            Self::Audio => "audio",
            Self::Video => "video",
        }
    }
}

/// Correlation data echoed back in media replies.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MediaRequest {
    /// Component inside the worker that asked.
    pub requester: String,
    /// Request id chosen by the requester.
    pub requestid: i64,
}

/// Audio/video capture requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaCommand {
    /// Open a capture track.
    Open(MediaKind, MediaRequest),
    /// Close the open capture track.
    Close(MediaKind, MediaRequest),
}

impl MediaCommand {
    /// Parse a `mediaStream` envelope.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Protocol`] when the correlation fields are missing.
    pub fn parse(env: &Envelope) -> Result<Option<Self>> {
        let cmd = match env.command.as_str() {
            "audioOpenCall" => Self::Open(MediaKind::Audio, params(env)?),
            "audioCloseCall" => Self::Close(MediaKind::Audio, params(env)?),
            "videoOpenCall" => Self::Open(MediaKind::Video, params(env)?),
            "videoCloseCall" => Self::Close(MediaKind::Video, params(env)?),
            _ => return Ok(None),
        };
        Ok(Some(cmd))
    }

    /// Build the reply for an open or close call.
    #[must_use]
    pub fn reply(kind: MediaKind, opened: bool, request: &MediaRequest, result: Value) -> Envelope {
        let verb = if opened { "OpenResponse" } else { "CloseResponse" };
        Envelope::new(
            namespace::MEDIA,
            format!("{}{verb}", kind.prefix()),
            json!({
                "requester": request.requester,
                "requestid": request.requestid,
                "result": result,
            }),
        )
    }
}
