//! In-memory transport for driving the bridge without real processes.
//!
//! The test suites use it as a scriptable stand-in for workers: every launch
//! is recorded as a [`MemoryWorker`], through which callers inject inbound
//! events and inspect what the bridge sent. Records are bounded: only the
//! latest [`MAX_RECORDED_LAUNCHES`] launches and, per launch, the latest
//! [`MAX_RECORDED_MESSAGES`] outbound envelopes are kept.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::models::descriptor::WorkerDescriptor;
use crate::models::message::Envelope;
use crate::transport::{Transport, TransportEvent, TransportFactory, TransportSink, WorkerKey};
use crate::{AppError, Result};

/// Launch records kept by a [`MemoryTransportFactory`].
pub const MAX_RECORDED_LAUNCHES: usize = 1_024;

/// Outbound envelopes kept per [`MemoryWorker`].
pub const MAX_RECORDED_MESSAGES: usize = 4_096;

type Outbox = Arc<Mutex<VecDeque<Envelope>>>;

/// One recorded launch attempt.
#[derive(Debug, Clone)]
pub struct MemoryWorker {
    /// Descriptor the attempt was launched with.
    pub descriptor: WorkerDescriptor,
    sink: TransportSink,
    sent: Outbox,
    closed: Arc<AtomicBool>,
}

impl MemoryWorker {
    /// Attempt identity.
    #[must_use]
    pub fn key(&self) -> WorkerKey {
        self.sink.key()
    }

    /// Deliver an inbound event as if the worker had produced it.
    pub async fn inject(&self, event: TransportEvent) -> bool {
        self.sink.emit(event).await
    }

    /// Convenience wrapper around [`inject`](Self::inject) for messages.
    pub async fn inject_message(&self, envelope: Envelope) -> bool {
        self.inject(TransportEvent::Message(envelope)).await
    }

    /// Recorded envelopes sent to this attempt, oldest first.
    #[must_use]
    pub fn sent(&self) -> Vec<Envelope> {
        lock(&self.sent).iter().cloned().collect()
    }

    /// Take the recorded envelopes, leaving the record empty.
    pub fn drain_sent(&self) -> Vec<Envelope> {
        lock(&self.sent).drain(..).collect()
    }

    /// Simulate the worker going away: later sends fail as on a broken pipe.
    pub fn hang_up(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    /// Whether the attempt was closed by its owner or hung up.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Default)]
struct State {
    launches: VecDeque<MemoryWorker>,
    launched: usize,
    failures_remaining: usize,
}

/// Factory recording every launch; cloning shares the record.
#[derive(Debug, Clone, Default)]
pub struct MemoryTransportFactory {
    state: Arc<Mutex<State>>,
}

impl MemoryTransportFactory {
    /// Create an empty factory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` launches fail.
    pub fn fail_next_launches(&self, count: usize) {
        lock(&self.state).failures_remaining = count;
    }

    /// Recorded launches, oldest first.
    #[must_use]
    pub fn launches(&self) -> Vec<MemoryWorker> {
        lock(&self.state).launches.iter().cloned().collect()
    }

    /// Number of successful launches so far, including evicted records.
    #[must_use]
    pub fn launch_count(&self) -> usize {
        lock(&self.state).launched
    }

    /// Most recent launch of `plugin`, if any.
    #[must_use]
    pub fn latest(&self, plugin: &str) -> Option<MemoryWorker> {
        lock(&self.state)
            .launches
            .iter()
            .rev()
            .find(|w| w.descriptor.plugin == plugin)
            .cloned()
    }
}

impl TransportFactory for MemoryTransportFactory {
    fn launch(
        &self,
        descriptor: &WorkerDescriptor,
        sink: TransportSink,
    ) -> Result<Box<dyn Transport>> {
        let mut state = lock(&self.state);
        if state.failures_remaining > 0 {
            state.failures_remaining -= 1;
            return Err(AppError::Transport(format!(
                "launch refused for {}",
                descriptor.label()
            )));
        }

        let sent = Outbox::default();
        let closed = Arc::new(AtomicBool::new(false));
        if state.launches.len() == MAX_RECORDED_LAUNCHES {
            state.launches.pop_front();
        }
        state.launches.push_back(MemoryWorker {
            descriptor: descriptor.clone(),
            sink,
            sent: Arc::clone(&sent),
            closed: Arc::clone(&closed),
        });
        state.launched += 1;

        Ok(Box::new(MemoryTransport { sent, closed }))
    }
}

struct MemoryTransport {
    sent: Outbox,
    closed: Arc<AtomicBool>,
}

impl Transport for MemoryTransport {
    fn send(&self, envelope: Envelope) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(AppError::Transport("memory transport is closed".into()));
        }
        let mut sent = lock(&self.sent);
        if sent.len() == MAX_RECORDED_MESSAGES {
            sent.pop_front();
        }
        sent.push_back(envelope);
        Ok(())
    }

    fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
