//! Heartbeat monitor for the primary worker.
//!
//! Every period the controller gets a tick. If the previous ping is still
//! unanswered the worker is considered hung and the monitor stops itself;
//! otherwise a new ping goes out. At most one ping is ever outstanding.

use std::time::Duration;

use tokio::sync::mpsc;
use tracing::debug;

use crate::timer::{self, TimerHandle};

/// What the controller should do for a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatAction {
    /// Send `heartbeat/ping`.
    SendPing,
    /// The last ping went unanswered; treat as a crash.
    Timeout,
    /// The monitor is not running; ignore the tick.
    Idle,
}

/// Heartbeat state: `awaiting_pong` plus the recurring timer.
#[derive(Debug)]
pub struct HeartbeatMonitor {
    period: Duration,
    awaiting_pong: bool,
    timer: Option<TimerHandle>,
}

impl HeartbeatMonitor {
    /// Create a stopped monitor.
    #[must_use]
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            awaiting_pong: false,
            timer: None,
        }
    }

    /// Start ticking into `tx`. Restarting resets the pong flag.
    pub fn start<E>(&mut self, tx: mpsc::Sender<E>, tick: E)
    where
        E: Clone + Send + 'static,
    {
        self.awaiting_pong = false;
        self.timer = Some(timer::every(self.period, tx, tick));
        debug!(period = ?self.period, "heartbeat started");
    }

    /// Handle one tick.
    pub fn on_tick(&mut self) -> HeartbeatAction {
        if self.timer.is_none() {
            return HeartbeatAction::Idle;
        }
        if self.awaiting_pong {
            self.stop();
            return HeartbeatAction::Timeout;
        }
        self.awaiting_pong = true;
        HeartbeatAction::SendPing
    }

    /// A pong arrived.
    pub fn on_pong(&mut self) {
        self.awaiting_pong = false;
    }

    /// Stop ticking. Idempotent.
    pub fn stop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.cancel();
            debug!("heartbeat stopped");
        }
    }

    /// Whether the timer is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.timer.is_some()
    }

    /// Whether a ping is outstanding.
    #[must_use]
    pub fn is_awaiting_pong(&self) -> bool {
        self.awaiting_pong
    }
}
