//! Worker transports.
//!
//! A transport is the opaque bidirectional channel to one worker attempt.
//! Outbound traffic goes through [`Transport::send`]; inbound traffic arrives
//! as [`TransportEvent`]s pushed into a [`TransportSink`], tagged with the
//! [`WorkerKey`] of the attempt that produced them so the owner can discard
//! stale events after a retry.
//!
//! Submodules:
//! - `codec`: NDJSON line framing with a 1 MiB cap.
//! - `reader`: stdout frame parser emitting [`TransportEvent`]s.
//! - `writer`: stdin writer task serialising outbound envelopes.
//! - `process`: child-process transport factory.
//! - `memory`: in-process transport for embedding and tests.

pub mod codec;
pub mod memory;
pub mod process;
pub mod reader;
pub mod writer;

use tokio::sync::mpsc;

use crate::models::descriptor::WorkerDescriptor;
use crate::models::message::Envelope;
use crate::Result;

/// Capacity of the per-owner delivery channel.
pub const DELIVERY_CHANNEL_CAPACITY: usize = 256;

/// Supervisor-assigned worker identifier.
pub type WorkerId = u64;

/// Identity of one launch attempt of one worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkerKey {
    /// Worker identifier; stable across retries.
    pub id: WorkerId,
    /// Attempt generation; bumped on every relaunch.
    pub attempt: u32,
}

/// Inbound event from a worker transport.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A namespaced message.
    Message(Envelope),
    /// Opaque binary payload; always treated as a crash diagnostic blob.
    Binary(Vec<u8>),
    /// The channel died.
    Crash {
        /// Human-readable cause.
        reason: String,
    },
}

/// A [`TransportEvent`] tagged with its originating attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    /// Attempt that produced the event.
    pub key: WorkerKey,
    /// The event itself.
    pub event: TransportEvent,
}

/// Event sink handed to a transport at launch.
#[derive(Debug, Clone)]
pub struct TransportSink {
    key: WorkerKey,
    tx: mpsc::Sender<Delivery>,
}

impl TransportSink {
    /// Create a sink that tags every event with `key`.
    #[must_use]
    pub fn new(key: WorkerKey, tx: mpsc::Sender<Delivery>) -> Self {
        Self { key, tx }
    }

    /// Attempt this sink reports for.
    #[must_use]
    pub fn key(&self) -> WorkerKey {
        self.key
    }

    /// Push an event to the owner.
    ///
    /// Returns `false` when the owner has gone away.
    pub async fn emit(&self, event: TransportEvent) -> bool {
        self.tx
            .send(Delivery {
                key: self.key,
                event,
            })
            .await
            .is_ok()
    }
}

/// Outbound half of a live worker channel.
pub trait Transport: Send {
    /// Queue `envelope` for delivery to the worker.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Transport`](crate::AppError::Transport) when the
    /// channel is already closed.
    fn send(&self, envelope: Envelope) -> Result<()>;

    /// Tear the channel down. Must be idempotent.
    fn close(&mut self);
}

/// Creates transports for spawn attempts.
pub trait TransportFactory: Send + Sync {
    /// Launch one attempt of `descriptor`, reporting inbound traffic to `sink`.
    ///
    /// # Errors
    ///
    /// Returns an error when the worker cannot be started; callers treat this
    /// as a failed attempt.
    fn launch(
        &self,
        descriptor: &WorkerDescriptor,
        sink: TransportSink,
    ) -> Result<Box<dyn Transport>>;
}
