//! Process supervisor.
//!
//! Creates worker handles from spawn requests, applies the spawn
//! timeout/retry policy, relays stdout/stderr/exit to whoever asked for the
//! worker, and accepts nested spawn requests arriving through a live
//! worker's own channel.
//!
//! The supervisor never runs on its own task. Its owner (the lifecycle
//! controller) selects on the [`SupervisorInbox`] channels and feeds each
//! item back through [`Supervisor::handle_delivery`] or
//! [`Supervisor::handle_timeout`]. Anything that must leave the supervisor
//! (messages for the primary worker, crash dumps) is returned as
//! [`SupervisorAction`]s.
//!
//! # Retry policy
//!
//! Each attempt arms a timer at the handle's current timeout. A successful
//! `runtime/loadResult` cancels it. If it fires first the attempt is torn
//! down; below the ceiling the timeout doubles and a new attempt starts
//! with the same descriptor, otherwise the requester receives one exit
//! with result `-1`.

pub mod handle;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, error, info, info_span, warn};

use crate::config::SupervisorConfig;
use crate::models::descriptor::{SpawnRequest, WorkerDescriptor};
use crate::models::message::{ChildProcessCommand, Envelope, RuntimeCommand};
use crate::models::namespace;
use crate::timer;
use crate::transport::{
    Delivery, TransportEvent, TransportFactory, TransportSink, WorkerId, WorkerKey,
    DELIVERY_CHANNEL_CAPACITY,
};

pub use handle::{Relay, Relays, WorkerHandle};

/// Work the supervisor hands back to its owner.
#[derive(Debug, Clone, PartialEq)]
pub enum SupervisorAction {
    /// Post this envelope to the primary worker.
    ToPrimary(Envelope),
    /// Forward a crash diagnostic blob to the crash reporter.
    CrashDump {
        /// Report message, e.g. `minidump on <command>`.
        reason: String,
        /// Opaque crash payload.
        minidump: Vec<u8>,
    },
}

/// Receiving ends the owner must poll.
#[derive(Debug)]
pub struct SupervisorInbox {
    /// Inbound traffic from every child worker attempt.
    pub deliveries: mpsc::Receiver<Delivery>,
    /// Spawn timeouts, tagged with the attempt they were armed for.
    pub timeouts: mpsc::Receiver<WorkerKey>,
}

/// Owner of every live child worker.
pub struct Supervisor {
    factory: Arc<dyn TransportFactory>,
    base_timeout: Duration,
    ceiling: Duration,
    live: HashMap<WorkerId, WorkerHandle>,
    next_id: WorkerId,
    delivery_tx: mpsc::Sender<Delivery>,
    timeout_tx: mpsc::Sender<WorkerKey>,
}

impl Supervisor {
    /// Create a supervisor launching workers through `factory`.
    #[must_use]
    pub fn new(
        factory: Arc<dyn TransportFactory>,
        config: &SupervisorConfig,
    ) -> (Self, SupervisorInbox) {
        let (delivery_tx, deliveries) = mpsc::channel(DELIVERY_CHANNEL_CAPACITY);
        let (timeout_tx, timeouts) = mpsc::channel(DELIVERY_CHANNEL_CAPACITY);
        let supervisor = Self {
            factory,
            base_timeout: config.base_timeout(),
            ceiling: config.ceiling(),
            live: HashMap::new(),
            next_id: 1,
            delivery_tx,
            timeout_tx,
        };
        (
            supervisor,
            SupervisorInbox {
                deliveries,
                timeouts,
            },
        )
    }

    /// Start a worker for `descriptor`.
    ///
    /// Never fails synchronously: a launch failure counts as a failed
    /// attempt and is retried when the spawn timer fires.
    pub fn spawn(&mut self, descriptor: WorkerDescriptor, relays: Relays) -> WorkerId {
        let id = self.next_id;
        self.next_id += 1;
        info!(worker_id = id, label = descriptor.label(), "spawning worker");
        self.live
            .insert(id, WorkerHandle::new(id, descriptor, self.base_timeout, relays));
        self.launch_attempt(id);
        id
    }

    /// Validate a raw spawn request and start it.
    ///
    /// An invalid request is answered with an exit of `-1` through the exit
    /// relay.
    pub fn spawn_request(&mut self, request: SpawnRequest, relays: Relays) -> Vec<SupervisorAction> {
        let mut out = Vec::new();
        let requester = request.requester.clone();
        let request_id = request.requestid;
        match WorkerDescriptor::try_from(request) {
            Ok(descriptor) => {
                self.spawn(descriptor, relays);
            }
            Err(e) => {
                warn!(requester, request_id, error = %e, "rejecting spawn request");
                self.deliver(&relays.exit, Envelope::exit(&requester, request_id, -1), &mut out);
            }
        }
        out
    }

    /// Handle one inbound event from a child worker.
    pub fn handle_delivery(&mut self, delivery: Delivery) -> Vec<SupervisorAction> {
        let mut out = Vec::new();
        let Delivery { key, event } = delivery;
        let Some(handle) = self.live.get(&key.id) else {
            debug!(worker_id = key.id, "event for removed worker ignored");
            return out;
        };
        if handle.attempt != key.attempt {
            debug!(
                worker_id = key.id,
                stale = key.attempt,
                current = handle.attempt,
                "event from stale attempt ignored"
            );
            return out;
        }

        match event {
            TransportEvent::Binary(minidump) => {
                out.push(SupervisorAction::CrashDump {
                    reason: format!("minidump on {}", handle.descriptor.plugin),
                    minidump,
                });
            }
            TransportEvent::Crash { reason } => {
                let exit = handle.descriptor.exit_message(-1);
                self.finish(key.id, exit, Some(&format!("worker process crashed: {reason}")), &mut out);
            }
            TransportEvent::Message(envelope) => self.classify(key.id, envelope, &mut out),
        }
        out
    }

    /// Handle a fired spawn timer.
    pub fn handle_timeout(&mut self, key: WorkerKey) -> Vec<SupervisorAction> {
        let mut out = Vec::new();
        let Some(handle) = self.live.get_mut(&key.id) else {
            return out;
        };
        if handle.attempt != key.attempt || handle.loaded {
            return out;
        }

        handle.teardown_attempt();
        let label = handle.descriptor.label();
        info!(worker_id = key.id, label, timeout = ?handle.timeout, "spawn timed out");

        if handle.timeout >= self.ceiling {
            error!(worker_id = key.id, label, "giving up on spawning worker");
            let exit = handle.descriptor.exit_message(-1);
            self.finish(key.id, exit, Some("spawn retries exhausted"), &mut out);
            return out;
        }

        handle.timeout = handle.timeout.checked_mul(2).unwrap_or(self.ceiling);
        handle.attempt += 1;
        info!(worker_id = key.id, timeout = ?handle.timeout, "retrying spawn");
        self.launch_attempt(key.id);
        out
    }

    /// Tear a worker down. Returns `false` if it was already gone.
    pub fn remove(&mut self, id: WorkerId, reason: Option<&str>) -> bool {
        self.take(id, reason).is_some()
    }

    /// Remove every live worker.
    pub fn shutdown(&mut self) {
        let ids: Vec<WorkerId> = self.live.keys().copied().collect();
        for id in ids {
            self.remove(id, Some("supervisor shutting down"));
        }
    }

    /// Whether `id` is still in the live set.
    #[must_use]
    pub fn is_live(&self, id: WorkerId) -> bool {
        self.live.contains_key(&id)
    }

    /// Whether `id` has reported a successful load.
    #[must_use]
    pub fn is_loaded(&self, id: WorkerId) -> bool {
        self.live.get(&id).is_some_and(|h| h.loaded)
    }

    /// Current spawn timeout of `id`.
    #[must_use]
    pub fn current_timeout(&self, id: WorkerId) -> Option<Duration> {
        self.live.get(&id).map(|h| h.timeout)
    }

    /// Number of live workers.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    // ── Internals ────────────────────────────────────────────────────────────

    fn launch_attempt(&mut self, id: WorkerId) {
        let Some(handle) = self.live.get_mut(&id) else {
            return;
        };
        let key = handle.key();
        let _span = info_span!("spawn_attempt", worker_id = id, attempt = key.attempt).entered();

        let sink = TransportSink::new(key, self.delivery_tx.clone());
        match self.factory.launch(&handle.descriptor, sink) {
            Ok(transport) => handle.transport = Some(transport),
            Err(e) => warn!(error = %e, "launch failed, waiting for spawn timer"),
        }
        handle.timer = Some(timer::schedule(handle.timeout, self.timeout_tx.clone(), key));
    }

    fn take(&mut self, id: WorkerId, reason: Option<&str>) -> Option<WorkerHandle> {
        let mut handle = self.live.remove(&id)?;
        handle.teardown_attempt();
        match reason {
            Some(reason) => info!(worker_id = id, label = handle.descriptor.label(), reason, "worker removed"),
            None => debug!(worker_id = id, label = handle.descriptor.label(), "worker removed"),
        }
        Some(handle)
    }

    /// Remove first, then deliver the exit exactly once.
    fn finish(
        &mut self,
        id: WorkerId,
        exit: Envelope,
        reason: Option<&str>,
        out: &mut Vec<SupervisorAction>,
    ) {
        if let Some(handle) = self.take(id, reason) {
            self.deliver(&handle.relays.exit, exit, out);
        }
    }

    fn classify(&mut self, id: WorkerId, mut envelope: Envelope, out: &mut Vec<SupervisorAction>) {
        match envelope.namespace.as_str() {
            namespace::RUNTIME => match RuntimeCommand::parse(&envelope) {
                Ok(Some(RuntimeCommand::LoadResult { result: true })) => {
                    if let Some(handle) = self.live.get_mut(&id) {
                        handle.loaded = true;
                        handle.cancel_timer();
                        info!(worker_id = id, label = handle.descriptor.label(), "worker loaded");
                    }
                }
                Ok(Some(RuntimeCommand::LoadResult { result: false })) => {
                    self.remove(id, Some("worker failed to load"));
                }
                Ok(Some(RuntimeCommand::CrashLogMessage)) => {}
                _ => self.reject(id, &envelope),
            },
            namespace::CHILD_PROCESS => match ChildProcessCommand::parse(&envelope) {
                Ok(Some(ChildProcessCommand::Spawn(request))) => {
                    let Some(parent) = self.live.get(&id) else {
                        return;
                    };
                    let relays = Relays {
                        exit: Relay::Worker(id),
                        stdout: parent.relays.stdout.clone(),
                        stderr: parent.relays.stderr.clone(),
                    };
                    out.extend(self.spawn_request(request, relays));
                }
                Ok(Some(cmd @ (ChildProcessCommand::Stdout | ChildProcessCommand::Stderr))) => {
                    let Some(handle) = self.live.get(&id) else {
                        return;
                    };
                    let relay = if cmd == ChildProcessCommand::Stdout {
                        handle.relays.stdout.clone()
                    } else {
                        handle.relays.stderr.clone()
                    };
                    envelope.namespace = namespace::WORKER_CHILD_PROCESS.to_owned();
                    if let Some(relay) = relay {
                        self.deliver(&relay, envelope, out);
                    }
                }
                Ok(Some(ChildProcessCommand::Exit)) => {
                    let Some(handle) = self.live.get(&id) else {
                        return;
                    };
                    envelope.namespace.clone_from(&handle.descriptor.requester);
                    self.finish(id, envelope, None, out);
                }
                _ => self.reject(id, &envelope),
            },
            _ => self.reject(id, &envelope),
        }
    }

    fn reject(&mut self, id: WorkerId, envelope: &Envelope) {
        let reason = format!(
            "received invalid message: namespace {:?}, command {:?}",
            envelope.namespace, envelope.command
        );
        self.remove(id, Some(&reason));
    }

    fn deliver(&mut self, relay: &Relay, envelope: Envelope, out: &mut Vec<SupervisorAction>) {
        match relay {
            Relay::Primary => out.push(SupervisorAction::ToPrimary(envelope)),
            Relay::Channel(tx) => {
                if tx.send(envelope).is_err() {
                    debug!("relay channel closed, dropping message");
                }
            }
            Relay::Worker(parent) => match self.live.get(parent) {
                Some(handle) => {
                    if let Err(e) = handle.post(envelope) {
                        warn!(worker_id = parent, error = %e, "relay to parent worker failed");
                    }
                }
                None => debug!(worker_id = parent, "parent worker gone, dropping relayed message"),
            },
        }
    }
}
