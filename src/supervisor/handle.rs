//! Per-worker state owned by the supervisor's live set.

use std::time::Duration;

use tokio::sync::mpsc;

use crate::models::descriptor::WorkerDescriptor;
use crate::models::message::Envelope;
use crate::timer::TimerHandle;
use crate::transport::{Transport, WorkerId, WorkerKey};

/// Where relayed exit/stdout/stderr messages go.
#[derive(Debug, Clone)]
pub enum Relay {
    /// Post to the primary worker (spawns requested by the primary).
    Primary,
    /// Post through a parent worker's transport (nested spawns).
    Worker(WorkerId),
    /// Plain channel for host-internal callers.
    Channel(mpsc::UnboundedSender<Envelope>),
}

/// Relay targets for one worker.
#[derive(Debug, Clone)]
pub struct Relays {
    /// Receives the exit notification, exactly once.
    pub exit: Relay,
    /// Receives relabeled stdout traffic, if anyone cares.
    pub stdout: Option<Relay>,
    /// Receives relabeled stderr traffic, if anyone cares.
    pub stderr: Option<Relay>,
}

impl Relays {
    /// Send exit, stdout and stderr to the same target.
    #[must_use]
    pub fn all(relay: Relay) -> Self {
        Self {
            exit: relay.clone(),
            stdout: Some(relay.clone()),
            stderr: Some(relay),
        }
    }

    /// Only the exit notification is wanted.
    #[must_use]
    pub fn exit_only(relay: Relay) -> Self {
        Self {
            exit: relay,
            stdout: None,
            stderr: None,
        }
    }
}

/// One live worker: Starting until `loaded`, retried on spawn timeout.
pub struct WorkerHandle {
    pub(crate) id: WorkerId,
    pub(crate) descriptor: WorkerDescriptor,
    pub(crate) timeout: Duration,
    pub(crate) attempt: u32,
    pub(crate) loaded: bool,
    pub(crate) timer: Option<TimerHandle>,
    pub(crate) transport: Option<Box<dyn Transport>>,
    pub(crate) relays: Relays,
}

impl WorkerHandle {
    pub(crate) fn new(
        id: WorkerId,
        descriptor: WorkerDescriptor,
        timeout: Duration,
        relays: Relays,
    ) -> Self {
        Self {
            id,
            descriptor,
            timeout,
            attempt: 0,
            loaded: false,
            timer: None,
            transport: None,
            relays,
        }
    }

    /// Identity of the current attempt.
    pub(crate) fn key(&self) -> WorkerKey {
        WorkerKey {
            id: self.id,
            attempt: self.attempt,
        }
    }

    pub(crate) fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.cancel();
        }
    }

    /// Cancel the timer and close the current attempt's transport.
    pub(crate) fn teardown_attempt(&mut self) {
        self.cancel_timer();
        if let Some(mut transport) = self.transport.take() {
            transport.close();
        }
    }

    /// Post to this worker's current attempt.
    pub(crate) fn post(&self, envelope: Envelope) -> crate::Result<()> {
        match &self.transport {
            Some(transport) => transport.send(envelope),
            None => Err(crate::AppError::NotReady(format!(
                "{} has no live transport",
                self.descriptor.label()
            ))),
        }
    }
}
