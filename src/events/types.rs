//! System event types
//!
//! Defines all event types that can be broadcast through the event bus.

use serde::{Deserialize, Serialize};

use crate::storage::LogicalSlot;

/// System event enumeration
///
/// All events are tagged with their event name for serialization.
/// The `serde(tag = "event", content = "data")` attribute creates a
/// JSON structure like:
/// ```json
/// {
///   "event": "storage.mounted",
///   "data": { "slot": "sd", "backend": "card-a" }
/// }
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum SystemEvent {
    /// A slot was mounted on a backend
    #[serde(rename = "storage.mounted")]
    StorageMounted {
        slot: LogicalSlot,
        /// Backend name
        backend: String,
    },

    /// The monitor found the mounted media gone
    ///
    /// The slot is already unmounted; the backend is released on the
    /// next mount request for the slot.
    #[serde(rename = "storage.device_removed")]
    StorageDeviceRemoved { slot: LogicalSlot, backend: String },

    /// A removed backend was released (deferred unmount)
    #[serde(rename = "storage.device_unmounted")]
    StorageDeviceUnmounted { slot: LogicalSlot, backend: String },

    /// No candidate backend could be mounted
    #[serde(rename = "storage.mount_failed")]
    StorageMountFailed {
        slot: LogicalSlot,
        /// Error code for programmatic handling
        error_code: String,
    },
}

impl SystemEvent {
    /// Event name as used in the serialized form
    pub fn name(&self) -> &'static str {
        match self {
            Self::StorageMounted { .. } => "storage.mounted",
            Self::StorageDeviceRemoved { .. } => "storage.device_removed",
            Self::StorageDeviceUnmounted { .. } => "storage.device_unmounted",
            Self::StorageMountFailed { .. } => "storage.mount_failed",
        }
    }

    /// Slot the event concerns
    pub fn slot(&self) -> LogicalSlot {
        match self {
            Self::StorageMounted { slot, .. }
            | Self::StorageDeviceRemoved { slot, .. }
            | Self::StorageDeviceUnmounted { slot, .. }
            | Self::StorageMountFailed { slot, .. } => *slot,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialization_tags() {
        let event = SystemEvent::StorageDeviceRemoved {
            slot: LogicalSlot::Usb,
            backend: "usb".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["event"], "storage.device_removed");
        assert_eq!(json["data"]["slot"], "usb");
        assert_eq!(json["data"]["backend"], "usb");
        assert_eq!(event.name(), "storage.device_removed");
    }

    #[test]
    fn test_roundtrip_keeps_slot() {
        let event = SystemEvent::StorageMountFailed {
            slot: LogicalSlot::Sd,
            error_code: "device_absent".to_string(),
        };
        let json = serde_json::to_string(&event).unwrap();
        let back: SystemEvent = serde_json::from_str(&json).unwrap();

        assert_eq!(back.slot(), LogicalSlot::Sd);
        assert_eq!(back.name(), event.name());
    }
}
