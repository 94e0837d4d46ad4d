//! Internal Event Bus for Batch Coordination
//!
//! Centralized, asynchronous pub/sub for batch lifecycle telemetry. The
//! steady-state loop publishes; the CLI and tests subscribe.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Global batcher events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum BatcherEvent {
    /// Prep loop started driving a target toward min security / max money
    PrepStarted { target: String },
    /// Prep loop finished; target is at the canonical prepped state
    PrepCompleted { target: String, cycles: u32 },
    /// The fitter settled on a plan inside the capacity budget
    PlanFitted {
        target: String,
        fraction: f64,
        weaken: u32,
        grow: u32,
        hack: u32,
    },
    /// A batch's jobs were all launched
    BatchDispatched { id: Uuid, target: String },
    /// All three effects landed; money extracted this cycle
    BatchLanded {
        id: Uuid,
        target: String,
        extracted: f64,
    },
    /// A batch aborted or timed out; the loop is falling back to prep
    BatchFailed {
        id: Option<Uuid>,
        target: String,
        reason: String,
    },
    /// No plan fits right now; waiting for capacity to free up
    CapacityWait { target: String },
    /// Generic status update
    StatusUpdate(String),
}

pub struct EventBus {
    tx: broadcast::Sender<BatcherEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1024);
        Self { tx }
    }

    /// Publish an event to all subscribers
    pub fn publish(&self, event: BatcherEvent) {
        let _ = self.tx.send(event);
    }

    /// Create a new subscriber
    pub fn subscribe(&self) -> broadcast::Receiver<BatcherEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

lazy_static::lazy_static! {
    /// Global singleton instance of the EventBus
    pub static ref BATCHER_EVENT_BUS: Arc<EventBus> = Arc::new(EventBus::new());
}

/// Helper macro to publish events globally
#[macro_export]
macro_rules! emit_event {
    ($event:expr) => {
        $crate::event_bus::BATCHER_EVENT_BUS.publish($event);
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_see_published_events() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.publish(BatcherEvent::PrepStarted {
            target: "n00dles".into(),
        });

        match rx.recv().await.expect("event delivered") {
            BatcherEvent::PrepStarted { target } => assert_eq!(target, "n00dles"),
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
