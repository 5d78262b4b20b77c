//! Per-slot mount state shared between the manager and the monitor

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use super::backend::StorageBackend;
use super::types::{LogicalSlot, MountState, SlotStatus};

#[derive(Default)]
struct SlotEntry {
    mounted: Option<Arc<dyn StorageBackend>>,
    pending_unmount: Option<Arc<dyn StorageBackend>>,
    mounted_at: Option<DateTime<Utc>>,
}

/// Mount table
///
/// One entry per slot, so a slot can never be mounted on two backends.
/// The mutex only makes access memory safe; ordering between the monitor
/// and foreground callers comes from the pause handshake.
#[derive(Default)]
pub struct MountTable {
    slots: Mutex<HashMap<LogicalSlot, SlotEntry>>,
}

impl MountTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mounted(&self, slot: LogicalSlot) -> Option<Arc<dyn StorageBackend>> {
        self.slots.lock().get(&slot).and_then(|e| e.mounted.clone())
    }

    pub fn state(&self, slot: LogicalSlot) -> MountState {
        match self.mounted(slot) {
            Some(backend) => MountState::MountedOn(backend.name().to_string()),
            None => MountState::Unmounted,
        }
    }

    /// Record `backend` as the slot's mount
    pub(crate) fn set_mounted(&self, slot: LogicalSlot, backend: Arc<dyn StorageBackend>) {
        let mut slots = self.slots.lock();
        let entry = slots.entry(slot).or_default();
        entry.mounted = Some(backend);
        entry.mounted_at = Some(Utc::now());
    }

    /// Every slot that currently has a backend mounted
    pub fn mounted_backends(&self) -> Vec<(LogicalSlot, Arc<dyn StorageBackend>)> {
        self.slots
            .lock()
            .iter()
            .filter_map(|(slot, e)| e.mounted.clone().map(|b| (*slot, b)))
            .collect()
    }

    /// Move the slot's mount to the pending-unmount marker
    ///
    /// Only applies if `backend` is still the one mounted. Returns whether
    /// the slot changed.
    pub(crate) fn mark_removed(&self, slot: LogicalSlot, backend: &Arc<dyn StorageBackend>) -> bool {
        let mut slots = self.slots.lock();
        let Some(entry) = slots.get_mut(&slot) else {
            return false;
        };
        match entry.mounted.as_ref() {
            Some(current) if Arc::ptr_eq(current, backend) => {
                entry.pending_unmount = entry.mounted.take();
                entry.mounted_at = None;
                true
            }
            _ => false,
        }
    }

    pub fn pending_unmount(&self, slot: LogicalSlot) -> Option<Arc<dyn StorageBackend>> {
        self.slots
            .lock()
            .get(&slot)
            .and_then(|e| e.pending_unmount.clone())
    }

    pub(crate) fn take_pending(&self, slot: LogicalSlot) -> Option<Arc<dyn StorageBackend>> {
        self.slots
            .lock()
            .get_mut(&slot)
            .and_then(|e| e.pending_unmount.take())
    }

    pub fn status(&self, slot: LogicalSlot) -> SlotStatus {
        let slots = self.slots.lock();
        let entry = slots.get(&slot);
        SlotStatus {
            slot,
            state: match entry.and_then(|e| e.mounted.as_ref()) {
                Some(b) => MountState::MountedOn(b.name().to_string()),
                None => MountState::Unmounted,
            },
            pending_unmount: entry
                .and_then(|e| e.pending_unmount.as_ref())
                .map(|b| b.name().to_string()),
            mounted_at: entry.and_then(|e| e.mounted_at),
        }
    }
}
