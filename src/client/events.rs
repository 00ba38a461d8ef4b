//! Status events for UI layers and operators.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::offline::DrainReport;
use crate::resilience::CircuitState;

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ServiceStatusEvent {
    BreakerTransition {
        service: String,
        from: CircuitState,
        to: CircuitState,
    },
    RequestQueued {
        service: String,
        request_id: String,
    },
    QueueDrained(DrainReport),
}

/// Broadcast fan-out; events are dropped when nobody listens.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ServiceStatusEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    pub fn publish(&self, event: ServiceStatusEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServiceStatusEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
