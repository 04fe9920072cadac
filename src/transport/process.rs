//! Child-process transport.
//!
//! Each attempt launches the configured runtime binary with:
//! - `kill_on_drop(true)` so a leaked handle never leaves an orphan.
//! - `env_clear()` plus [`ALLOWED_ENV_VARS`], so host secrets stay out of
//!   the sandbox.
//! - Launch attributes in `BRIDGE_*` variables (descriptor fields joined
//!   with the reserved delimiter, plus shared metadata attributes).
//!
//! Inbound frames are parsed by [`run_reader`]; outbound envelopes go
//! through [`run_writer`]. Closing cancels both tasks and asks the process
//! to terminate.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::WorkerConfig;
use crate::models::descriptor::WorkerDescriptor;
use crate::models::message::Envelope;
use crate::transport::reader::run_reader;
use crate::transport::writer::run_writer;
use crate::transport::{Transport, TransportFactory, TransportSink};
use crate::{AppError, Result};

/// Environment variables inherited by worker processes.
pub const ALLOWED_ENV_VARS: &[&str] = &[
    "PATH",
    "HOME",
    "RUST_LOG",
    "LANG",
    "TZ",
    // Windows-specific variables.
    "USERPROFILE",
    "SystemRoot",
    "TEMP",
    "TMP",
];

/// Grace period between SIGTERM and the hard kill on close.
const TERMINATE_GRACE: Duration = Duration::from_secs(2);

/// Launches each worker attempt as a separate OS process.
#[derive(Debug, Clone)]
pub struct ProcessTransportFactory {
    program: PathBuf,
    args: Vec<String>,
    envs: Vec<(String, String)>,
    working_directory: Option<PathBuf>,
    shared_attributes: Vec<(String, String)>,
}

impl ProcessTransportFactory {
    /// Build a factory from the `[worker]` config section.
    ///
    /// `shared_attributes` are added to every launch (package name, log
    /// level and the like).
    #[must_use]
    pub fn new(config: &WorkerConfig, shared_attributes: Vec<(String, String)>) -> Self {
        Self {
            program: config.command.clone(),
            args: config.args.clone(),
            envs: config
                .envs
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            working_directory: config.working_directory.clone(),
            shared_attributes,
        }
    }

    fn command_for(&self, descriptor: &WorkerDescriptor) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);

        cmd.env_clear();
        for &key in ALLOWED_ENV_VARS {
            if let Ok(val) = std::env::var(key) {
                cmd.env(key, val);
            }
        }
        for (key, val) in &self.envs {
            cmd.env(key, val);
        }
        for (key, val) in &self.shared_attributes {
            cmd.env(key, val);
        }
        for (key, val) in descriptor.launch_attributes() {
            cmd.env(key, val);
        }

        if let Some(dir) = &self.working_directory {
            cmd.current_dir(dir);
        }
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        cmd
    }
}

impl TransportFactory for ProcessTransportFactory {
    fn launch(
        &self,
        descriptor: &WorkerDescriptor,
        sink: TransportSink,
    ) -> Result<Box<dyn Transport>> {
        let label = descriptor.label();
        let mut child = self
            .command_for(descriptor)
            .spawn()
            .map_err(|e| AppError::Transport(format!("failed to spawn worker {label}: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| AppError::Transport("failed to capture worker stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AppError::Transport("failed to capture worker stdout".into()))?;

        info!(label, pid = child.id(), attempt = sink.key().attempt, "worker process started");

        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::unbounded_channel();
        let span = info_span!("worker", label = %label);

        tokio::spawn(
            run_reader(label.clone(), stdout, sink, cancel.clone()).instrument(span.clone()),
        );
        let writer_label = label.clone();
        let writer_cancel = cancel.clone();
        tokio::spawn(
            async move {
                if let Err(e) = run_writer(writer_label, stdin, rx, writer_cancel).await {
                    warn!(error = %e, "worker writer stopped");
                }
            }
            .instrument(span.clone()),
        );
        tokio::spawn(monitor_exit(label.clone(), child, cancel.clone()).instrument(span));

        Ok(Box::new(ProcessTransport {
            label,
            tx: Some(tx),
            cancel,
        }))
    }
}

struct ProcessTransport {
    label: String,
    tx: Option<mpsc::UnboundedSender<Envelope>>,
    cancel: CancellationToken,
}

impl Transport for ProcessTransport {
    fn send(&self, envelope: Envelope) -> Result<()> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| AppError::Transport(format!("{} is closed", self.label)))?;
        tx.send(envelope)
            .map_err(|_| AppError::Transport(format!("{} stdin is gone", self.label)))
    }

    fn close(&mut self) {
        if self.tx.take().is_some() {
            debug!(label = self.label, "closing worker transport");
        }
        self.cancel.cancel();
    }
}

impl Drop for ProcessTransport {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Own the child until it exits or the transport is closed.
async fn monitor_exit(label: String, mut child: Child, cancel: CancellationToken) {
    tokio::select! {
        status = child.wait() => match status {
            Ok(status) => info!(label, code = status.code(), "worker process exited"),
            Err(e) => warn!(label, error = %e, "error waiting for worker process"),
        },
        () = cancel.cancelled() => {
            terminate(&label, &mut child);
            if tokio::time::timeout(TERMINATE_GRACE, child.wait()).await.is_err() {
                warn!(label, "worker ignored SIGTERM, killing");
                if let Err(e) = child.kill().await {
                    warn!(label, error = %e, "failed to kill worker process");
                }
            }
        }
    }
}

#[cfg(unix)]
fn terminate(label: &str, child: &mut Child) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Some(pid) = child.id().and_then(|id| i32::try_from(id).ok()) else {
        return;
    };
    if let Err(e) = kill(Pid::from_raw(pid), Signal::SIGTERM) {
        debug!(label, error = %e, "SIGTERM failed");
    }
}

#[cfg(not(unix))]
fn terminate(label: &str, child: &mut Child) {
    if let Err(e) = child.start_kill() {
        debug!(label, error = %e, "kill failed");
    }
}
