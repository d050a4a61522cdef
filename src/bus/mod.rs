//! Outbound message bus
//!
//! Downstream consumers (recorders, payout, statistics) receive pool
//! events over a bounded channel. Publishing never blocks the hot path:
//! when the channel is full the event is dropped with a warning and the
//! share itself stays counted in session state.

use crate::share::Share;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::warn;

/// Events published by the pool core.
#[derive(Debug, Clone)]
pub enum PoolEvent {
    /// A validated share
    NewShare(Share),
    /// A block candidate the daemon accepted
    NewBlock { block_hash: String, height: u64 },
    /// Operational measurement
    Telemetry {
        category: &'static str,
        duration: Duration,
        success: bool,
    },
}

/// Bounded, fail-fast publisher handle.
#[derive(Clone)]
pub struct MessageBus {
    tx: mpsc::Sender<PoolEvent>,
}

impl MessageBus {
    /// Create a bus with the given capacity. The receiver half goes to
    /// the downstream consumer task.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<PoolEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    /// Publish an event. Returns false if the bus was full or closed.
    pub fn publish(&self, event: PoolEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(event)) => {
                warn!(event = ?event_name(&event), "message bus full, dropping event");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Convenience wrapper for telemetry points.
    pub fn telemetry(&self, category: &'static str, duration: Duration, success: bool) {
        self.publish(PoolEvent::Telemetry {
            category,
            duration,
            success,
        });
    }
}

fn event_name(event: &PoolEvent) -> &'static str {
    match event {
        PoolEvent::NewShare(_) => "new_share",
        PoolEvent::NewBlock { .. } => "new_block",
        PoolEvent::Telemetry { .. } => "telemetry",
    }
}
