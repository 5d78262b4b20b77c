//! Event system for storage state notifications
//!
//! Mount changes and media removals are broadcast on an event bus so
//! front ends (the GUI, the `watch` command) can refresh without polling.

pub mod types;

pub use types::SystemEvent;

use tokio::sync::broadcast;

/// Event channel capacity (ring buffer size)
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Event bus for broadcasting storage events
///
/// # Example
///
/// ```no_run
/// use slotfs::events::{EventBus, SystemEvent};
/// use slotfs::storage::LogicalSlot;
///
/// let bus = EventBus::new();
/// let mut rx = bus.subscribe();
///
/// bus.publish(SystemEvent::StorageMounted {
///     slot: LogicalSlot::Sd,
///     backend: "card-a".to_string(),
/// });
/// ```
pub struct EventBus {
    tx: broadcast::Sender<SystemEvent>,
}

impl EventBus {
    /// Create a new event bus
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Publish an event to all subscribers
    ///
    /// Events published with no subscriber are dropped.
    pub fn publish(&self, event: SystemEvent) {
        let _ = self.tx.send(event);
    }

    /// Subscribe to events
    ///
    /// A subscriber that falls more than the channel capacity behind gets
    /// a `Lagged` error and misses events.
    pub fn subscribe(&self) -> broadcast::Receiver<SystemEvent> {
        self.tx.subscribe()
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
