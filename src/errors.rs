//! Error types shared across the application.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Worker transport failure (launch, framing, write).
    Transport(String),
    /// A worker sent traffic the bridge does not understand.
    Protocol(String),
    /// A spawn request could not be turned into a worker.
    Spawn(String),
    /// A host service call failed.
    Service(String),
    /// Crash-report queue failure (load, persist, upload).
    CrashQueue(String),
    /// A namespace already has a registered handler.
    AlreadyRegistered(String),
    /// The target worker is not ready to receive messages.
    NotReady(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Transport(msg) => write!(f, "transport: {msg}"),
            Self::Protocol(msg) => write!(f, "protocol: {msg}"),
            Self::Spawn(msg) => write!(f, "spawn: {msg}"),
            Self::Service(msg) => write!(f, "service: {msg}"),
            Self::CrashQueue(msg) => write!(f, "crash queue: {msg}"),
            Self::AlreadyRegistered(msg) => write!(f, "already registered: {msg}"),
            Self::NotReady(msg) => write!(f, "not ready: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Protocol(format!("malformed json: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
