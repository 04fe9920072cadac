//! Host timers that post events into an owner's channel.
//!
//! Timers never touch owner state directly: when they fire they send a
//! value into an `mpsc` channel the owner's event loop already selects on.
//! Dropping or cancelling the returned [`TimerHandle`] stops the timer, and
//! the owner must still tolerate a late event (one that was already queued
//! when the handle was dropped).

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Handle to a scheduled timer; cancels the timer on drop.
#[derive(Debug)]
pub struct TimerHandle {
    cancel: CancellationToken,
    join_handle: Option<JoinHandle<()>>,
}

impl TimerHandle {
    /// Stop the timer. Idempotent.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether the timer was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Cancel and wait for the timer task to finish.
    pub async fn await_completion(mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.join_handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Send `event` into `tx` once, after `delay`.
#[must_use]
pub fn schedule<E>(delay: Duration, tx: mpsc::Sender<E>, event: E) -> TimerHandle
where
    E: Send + 'static,
{
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    let join_handle = tokio::spawn(async move {
        tokio::select! {
            () = token.cancelled() => {}
            () = tokio::time::sleep(delay) => {
                if tx.send(event).await.is_err() {
                    debug!("timer fired after owner went away");
                }
            }
        }
    });

    TimerHandle {
        cancel,
        join_handle: Some(join_handle),
    }
}

/// Send a clone of `event` into `tx` every `period`, first after one period.
#[must_use]
pub fn every<E>(period: Duration, tx: mpsc::Sender<E>, event: E) -> TimerHandle
where
    E: Clone + Send + 'static,
{
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    let join_handle = tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        // The first tick completes immediately.
        interval.tick().await;
        loop {
            tokio::select! {
                () = token.cancelled() => return,
                _ = interval.tick() => {
                    if tx.send(event.clone()).await.is_err() {
                        return;
                    }
                }
            }
        }
    });

    TimerHandle {
        cancel,
        join_handle: Some(join_handle),
    }
}
