#![forbid(unsafe_code)]

//! Host-side bridge for sandboxed runtime workers.
//!
//! The [`controller::LifecycleController`] owns the primary worker, the
//! namespace router and the [`supervisor::Supervisor`] for child workers.
//! Workers are reached through [`transport::Transport`] implementations; the
//! window and host services are injected through the traits in [`host`].

pub mod config;
pub mod controller;
pub mod crash_queue;
pub mod errors;
pub mod host;
pub mod layout;
pub mod metadata;
pub mod models;
pub mod router;
pub mod supervisor;
pub mod timer;
pub mod transport;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
