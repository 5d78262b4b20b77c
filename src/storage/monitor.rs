//! Storage presence monitoring
//!
//! A single background task periodically checks whether the media of every
//! mounted backend is still inserted. When it is gone, the slot is marked
//! unmounted and the backend is parked as a pending unmount, released on
//! the next mount request for that slot.
//!
//! Foreground code must pause the monitor before touching mount state or
//! the filesystem driver:
//!
//! ```text
//! foreground                      monitor task
//!     |  pause(): depth 0 -> 1        |
//!     |------------------------------>| (next checkpoint)
//!     |        state = Suspended      |
//!     |<------------------------------|
//!     |  ... mount / read / write ... |  parked
//!     |  drop guard: depth 1 -> 0     |
//!     |------------------------------>| state = Running
//! ```
//!
//! The task only checks for a pause request at checkpoints between sleep
//! increments, so a pause waits at most one increment.

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::table::MountTable;
use crate::events::{EventBus, SystemEvent};

/// Presence monitor configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Delay before the first presence check, lets hardware settle after boot
    pub grace_period_ms: u64,
    /// Time between presence checks
    pub poll_interval_ms: u64,
    /// Sleep granularity; bounds how long a pause request can wait
    pub poll_step_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            grace_period_ms: 1000,
            poll_interval_ms: 1000,
            poll_step_ms: 100,
        }
    }
}

impl MonitorConfig {
    fn step(&self) -> Duration {
        Duration::from_millis(self.poll_step_ms.max(1))
    }

    /// Time between polls, never shorter than one step
    fn interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms).max(self.step())
    }
}

/// State reported by the monitor task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    /// Polling (or sleeping between polls)
    Running,
    /// Parked at a checkpoint, not executing
    Suspended,
}

#[derive(Debug, Clone, Copy)]
struct Control {
    /// Outstanding pauses
    depth: usize,
    state: MonitorState,
}

/// Presence monitor
pub struct PresenceMonitor {
    config: MonitorConfig,
    table: Arc<MountTable>,
    control: watch::Sender<Control>,
    events: RwLock<Option<Arc<EventBus>>>,
    polls: AtomicU64,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl PresenceMonitor {
    /// Create a monitor over `table`. The task is not started yet.
    pub fn new(config: MonitorConfig, table: Arc<MountTable>) -> Self {
        // Suspended until the task reaches its first checkpoint
        let (control, _) = watch::channel(Control {
            depth: 0,
            state: MonitorState::Suspended,
        });
        Self {
            config,
            table,
            control,
            events: RwLock::new(None),
            polls: AtomicU64::new(0),
            task: Mutex::new(None),
        }
    }

    /// Set the event bus for removal notifications
    pub fn set_event_bus(&self, events: Arc<EventBus>) {
        *self.events.write() = Some(events);
    }

    /// Spawn the monitor task on the current tokio runtime
    ///
    /// Calling this again once the task exists does nothing. The task runs
    /// until the runtime shuts down.
    pub fn start(self: &Arc<Self>) {
        let mut task = self.task.lock();
        if task.is_some() {
            return;
        }
        let monitor = Arc::clone(self);
        *task = Some(tokio::spawn(async move { monitor.run().await }));
        info!(
            "Storage presence monitor started (grace {}ms, interval {}ms)",
            self.config.grace_period_ms, self.config.poll_interval_ms
        );
    }

    pub fn is_started(&self) -> bool {
        self.task.lock().is_some()
    }

    /// Suspend the monitor and wait until it reports `Suspended`
    ///
    /// Pauses nest. Only the first one waits on the task; the monitor
    /// runs again when the last guard is dropped. If the monitor task was
    /// never started this returns immediately.
    pub async fn pause(&self) -> MonitorPause<'_> {
        let mut first = false;
        self.control.send_modify(|c| {
            c.depth += 1;
            first = c.depth == 1;
        });
        // Built before waiting so a cancelled pause still resumes
        let guard = MonitorPause { monitor: self };
        if first {
            debug!("Pausing presence monitor");
        }

        let mut rx = self.control.subscribe();
        // The sender lives in `self`, so this cannot observe a closed channel
        let _ = rx.wait_for(|c| c.state == MonitorState::Suspended).await;
        guard
    }

    fn resume(&self) {
        let released = self.control.send_if_modified(|c| {
            c.depth = c.depth.saturating_sub(1);
            c.depth == 0
        });
        if released {
            debug!("Resuming presence monitor");
        }
    }

    /// Current state reported by the task
    pub fn state(&self) -> MonitorState {
        self.control.borrow().state
    }

    /// Number of outstanding pauses
    pub fn pause_depth(&self) -> usize {
        self.control.borrow().depth
    }

    /// Completed presence polls since start
    pub fn poll_count(&self) -> u64 {
        self.polls.load(Ordering::Relaxed)
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    async fn run(self: Arc<Self>) {
        let mut rx = self.control.subscribe();

        self.countdown(&mut rx, Duration::from_millis(self.config.grace_period_ms))
            .await;

        loop {
            // A checkpoint has just passed with no pause outstanding
            self.poll_once();
            self.countdown(&mut rx, self.config.interval()).await;
        }
    }

    /// Sleep for `total` in poll steps, honoring pauses between steps
    ///
    /// Always ends with a checkpoint, so the caller runs with no pause
    /// outstanding.
    async fn countdown(&self, rx: &mut watch::Receiver<Control>, total: Duration) {
        let step = self.config.step();
        let mut remaining = total;
        loop {
            self.checkpoint(rx).await;
            if remaining.is_zero() {
                return;
            }
            let slice = remaining.min(step);
            tokio::time::sleep(slice).await;
            remaining -= slice;
        }
    }

    /// Park while any pause is outstanding
    async fn checkpoint(&self, rx: &mut watch::Receiver<Control>) {
        loop {
            let mut may_run = false;
            self.control.send_if_modified(|c| {
                let next = if c.depth == 0 {
                    may_run = true;
                    MonitorState::Running
                } else {
                    MonitorState::Suspended
                };
                let changed = c.state != next;
                c.state = next;
                changed
            });
            if may_run {
                return;
            }
            let _ = rx.wait_for(|c| c.depth == 0).await;
        }
    }

    fn poll_once(&self) {
        for (slot, backend) in self.table.mounted_backends() {
            if backend.is_present() {
                continue;
            }
            if self.table.mark_removed(slot, &backend) {
                info!(
                    "Media removed from {} slot ({}), unmount deferred",
                    slot,
                    backend.name()
                );
                if let Some(ref events) = *self.events.read() {
                    events.publish(SystemEvent::StorageDeviceRemoved {
                        slot,
                        backend: backend.name().to_string(),
                    });
                }
            }
        }
        self.polls.fetch_add(1, Ordering::Relaxed);
    }
}

/// Outstanding pause of the presence monitor
///
/// Dropping the guard resumes the monitor, which covers every early
/// return of the operation holding it.
#[must_use = "the monitor resumes as soon as the guard is dropped"]
pub struct MonitorPause<'a> {
    monitor: &'a PresenceMonitor,
}

impl MonitorPause<'_> {
    /// Resume explicitly; same as dropping the guard
    pub fn resume(self) {}
}

impl Drop for MonitorPause<'_> {
    fn drop(&mut self) {
        self.monitor.resume();
    }
}
