//! Mount manager
//!
//! Owns the per-slot mount state and performs mount-with-fallback:
//! - Releases a backend the monitor saw removed (deferred unmount)
//! - Tries the slot's backends in priority order until one mounts
//! - Leaves an existing mount untouched

use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::fs::FileSystem;
use super::monitor::{MonitorConfig, PresenceMonitor};
use super::registry::DeviceRegistry;
use super::table::MountTable;
use super::types::{LogicalSlot, MountOutcome, MountState, SlotStatus};
use crate::error::{Result, StorageError};
use crate::events::{EventBus, SystemEvent};
use crate::utils::LogThrottler;
use crate::warn_throttled;

/// Mount manager
pub struct MountManager {
    registry: DeviceRegistry,
    table: Arc<MountTable>,
    monitor: Arc<PresenceMonitor>,
    fs: Arc<dyn FileSystem>,
    events: RwLock<Option<Arc<EventBus>>>,
    throttler: LogThrottler,
}

impl MountManager {
    pub fn new(registry: DeviceRegistry, fs: Arc<dyn FileSystem>, monitor: MonitorConfig) -> Self {
        let table = Arc::new(MountTable::new());
        let monitor = Arc::new(PresenceMonitor::new(monitor, table.clone()));
        Self {
            registry,
            table,
            monitor,
            fs,
            events: RwLock::new(None),
            throttler: LogThrottler::default(),
        }
    }

    /// Set event bus for broadcasting mount changes
    pub fn set_event_bus(&self, events: Arc<EventBus>) {
        *self.events.write() = Some(events.clone());
        self.monitor.set_event_bus(events);
    }

    fn publish_event(&self, event: SystemEvent) {
        if let Some(ref bus) = *self.events.read() {
            bus.publish(event);
        }
    }

    pub fn monitor(&self) -> &Arc<PresenceMonitor> {
        &self.monitor
    }

    pub fn filesystem(&self) -> &Arc<dyn FileSystem> {
        &self.fs
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    /// Mount a slot
    ///
    /// Safe to call as often as the caller likes: a mounted slot is left
    /// alone and reported as [`MountOutcome::AlreadyMounted`]. The first
    /// call also starts the presence monitor.
    pub async fn mount(&self, slot: LogicalSlot) -> Result<MountOutcome> {
        self.monitor.start();
        let _pause = self.monitor.pause().await;

        self.release_pending(slot);

        if let Some(backend) = self.table.mounted(slot) {
            debug!("{} slot already mounted on {}", slot, backend.name());
            return Ok(MountOutcome::AlreadyMounted(backend.name().to_string()));
        }

        for backend in self.registry.candidates(slot) {
            if !backend.startup() {
                debug!("{} backend {} did not start", slot, backend.name());
                continue;
            }
            if !self.fs.mount(slot.volume(), backend.as_ref()) {
                warn!(
                    "{} backend {} started but its filesystem could not be mapped",
                    slot,
                    backend.name()
                );
                backend.shutdown();
                continue;
            }

            self.table.set_mounted(slot, backend.clone());
            self.throttler.clear(&absent_key(slot));
            info!("Mounted {} slot on {}", slot, backend.name());
            self.publish_event(SystemEvent::StorageMounted {
                slot,
                backend: backend.name().to_string(),
            });
            return Ok(MountOutcome::Mounted(backend.name().to_string()));
        }

        let err = StorageError::DeviceAbsent { slot };
        warn_throttled!(self.throttler, &absent_key(slot), "{}", err);
        self.publish_event(SystemEvent::StorageMountFailed {
            slot,
            error_code: err.code().to_string(),
        });
        Err(err)
    }

    /// Mount the slot selected by a logical path (`sd:/...`, `usb:/...`)
    pub async fn mount_path(&self, path: &str) -> Result<MountOutcome> {
        let slot =
            LogicalSlot::from_path(path).ok_or_else(|| StorageError::UnknownSlot(path.to_string()))?;
        self.mount(slot).await
    }

    /// Explicit unmount is not supported
    ///
    /// There is no removal callback from the hardware, so a live mount is
    /// only reconciled when the monitor notices the media is gone and the
    /// next [`mount`](Self::mount) for the slot releases it.
    pub async fn unmount(&self, slot: LogicalSlot) -> Result<()> {
        debug!("Ignoring explicit unmount of {} slot", slot);
        Err(StorageError::Unsupported(
            "explicit unmount; removed media is released on the next mount",
        ))
    }

    /// Deferred unmount of a backend the monitor saw removed
    ///
    /// Caller must hold a monitor pause.
    fn release_pending(&self, slot: LogicalSlot) {
        let Some(backend) = self.table.take_pending(slot) else {
            return;
        };

        self.fs.unmount(slot.volume());
        backend.shutdown();
        backend.reset();

        info!("Released removed {} backend {}", slot, backend.name());
        self.publish_event(SystemEvent::StorageDeviceUnmounted {
            slot,
            backend: backend.name().to_string(),
        });
    }

    pub async fn state(&self, slot: LogicalSlot) -> MountState {
        let _pause = self.monitor.pause().await;
        self.table.state(slot)
    }

    /// Name of the backend waiting for a deferred unmount, if any
    pub async fn pending_unmount(&self, slot: LogicalSlot) -> Option<String> {
        let _pause = self.monitor.pause().await;
        self.table
            .pending_unmount(slot)
            .map(|b| b.name().to_string())
    }

    /// Status of every slot
    pub async fn snapshot(&self) -> Vec<SlotStatus> {
        let _pause = self.monitor.pause().await;
        LogicalSlot::ALL
            .iter()
            .map(|slot| self.table.status(*slot))
            .collect()
    }
}

fn absent_key(slot: LogicalSlot) -> String {
    format!("{}_absent", slot)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::storage::backend::StorageBackend;
    use crate::storage::fs::HostFileSystem;
    use parking_lot::Mutex;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    pub(crate) type Journal = Arc<Mutex<Vec<String>>>;

    /// Backend with a switchable card and a call journal
    pub(crate) struct FakeBackend {
        name: String,
        root: PathBuf,
        present: AtomicBool,
        quirky: bool,
        journal: Journal,
    }

    impl FakeBackend {
        pub(crate) fn new(name: &str, root: &Path, journal: &Journal) -> Arc<Self> {
            std::fs::create_dir_all(root).unwrap();
            Arc::new(Self {
                name: name.to_string(),
                root: root.to_path_buf(),
                present: AtomicBool::new(true),
                quirky: false,
                journal: journal.clone(),
            })
        }

        fn quirky(name: &str, root: &Path, journal: &Journal) -> Arc<Self> {
            std::fs::create_dir_all(root).unwrap();
            Arc::new(Self {
                name: name.to_string(),
                root: root.to_path_buf(),
                present: AtomicBool::new(true),
                quirky: true,
                journal: journal.clone(),
            })
        }

        pub(crate) fn set_present(&self, present: bool) {
            self.present.store(present, Ordering::SeqCst);
        }

        fn log(&self, call: &str) {
            self.journal.lock().push(format!("{}:{}", self.name, call));
        }
    }

    impl StorageBackend for FakeBackend {
        fn name(&self) -> &str {
            &self.name
        }
        fn is_present(&self) -> bool {
            self.present.load(Ordering::SeqCst)
        }
        fn startup(&self) -> bool {
            self.log("startup");
            self.is_present()
        }
        fn shutdown(&self) {
            self.log("shutdown");
        }
        fn reset(&self) {
            if self.quirky {
                self.shutdown();
                self.startup();
            }
        }
        fn media_root(&self) -> &Path {
            &self.root
        }
    }

    fn fast_monitor() -> MonitorConfig {
        MonitorConfig {
            grace_period_ms: 0,
            poll_interval_ms: 10,
            poll_step_ms: 2,
        }
    }

    pub(crate) fn manager(sd: Vec<Arc<FakeBackend>>, usb: Vec<Arc<FakeBackend>>) -> MountManager {
        fn erase(list: Vec<Arc<FakeBackend>>) -> Vec<Arc<dyn StorageBackend>> {
            list.into_iter()
                .map(|b| b as Arc<dyn StorageBackend>)
                .collect()
        }

        MountManager::new(
            DeviceRegistry::new(erase(sd), erase(usb)),
            Arc::new(HostFileSystem::new()),
            fast_monitor(),
        )
    }

    async fn wait_for_removal(manager: &MountManager, slot: LogicalSlot) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while manager.pending_unmount(slot).await.is_none() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("removal was not detected");
    }

    #[tokio::test]
    async fn test_mount_prefers_first_present_candidate() {
        let dir = tempfile::tempdir().unwrap();
        let journal = Journal::default();
        let front = FakeBackend::new("front-sd", &dir.path().join("front"), &journal);
        let card_a = FakeBackend::new("card-a", &dir.path().join("a"), &journal);
        front.set_present(false);

        let manager = manager(vec![front, card_a], vec![]);
        let outcome = manager.mount(LogicalSlot::Sd).await.unwrap();

        assert_eq!(outcome, MountOutcome::Mounted("card-a".to_string()));
        assert_eq!(
            manager.state(LogicalSlot::Sd).await,
            MountState::MountedOn("card-a".to_string())
        );
        assert_eq!(
            *journal.lock(),
            vec!["front-sd:startup".to_string(), "card-a:startup".to_string()]
        );
    }

    #[tokio::test]
    async fn test_mount_twice_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let journal = Journal::default();
        let usb = FakeBackend::new("usb", dir.path(), &journal);

        let manager = manager(vec![], vec![usb]);
        assert_eq!(
            manager.mount(LogicalSlot::Usb).await.unwrap(),
            MountOutcome::Mounted("usb".to_string())
        );
        let before = manager.snapshot().await;

        assert_eq!(
            manager.mount(LogicalSlot::Usb).await.unwrap(),
            MountOutcome::AlreadyMounted("usb".to_string())
        );
        let after = manager.snapshot().await;

        assert_eq!(before[1].state, after[1].state);
        assert_eq!(before[1].mounted_at, after[1].mounted_at);
        assert_eq!(journal.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_mount_without_media_fails_and_resumes() {
        let dir = tempfile::tempdir().unwrap();
        let journal = Journal::default();
        let card = FakeBackend::new("card-a", dir.path(), &journal);
        card.set_present(false);

        let events = Arc::new(EventBus::new());
        let mut rx = events.subscribe();
        let manager = manager(vec![card], vec![]);
        manager.set_event_bus(events);

        let err = manager.mount(LogicalSlot::Sd).await.unwrap_err();
        assert!(matches!(err, StorageError::DeviceAbsent { slot: LogicalSlot::Sd }));
        assert_eq!(manager.monitor().pause_depth(), 0);
        assert!(matches!(
            rx.recv().await.unwrap(),
            SystemEvent::StorageMountFailed { .. }
        ));

        // Slot without any candidate
        assert!(manager.mount(LogicalSlot::Usb).await.is_err());
        assert_eq!(manager.monitor().pause_depth(), 0);
    }

    #[tokio::test]
    async fn test_unmapped_candidate_is_shut_down_before_next() {
        let dir = tempfile::tempdir().unwrap();
        let journal = Journal::default();
        let broken = FakeBackend::new("front-sd", &dir.path().join("front"), &journal);
        let card_b = FakeBackend::new("card-b", &dir.path().join("b"), &journal);
        // Media reports present but the directory the driver maps is gone
        std::fs::remove_dir(dir.path().join("front")).unwrap();

        let manager = manager(vec![broken, card_b], vec![]);
        let outcome = manager.mount(LogicalSlot::Sd).await.unwrap();

        assert_eq!(outcome.backend(), "card-b");
        assert_eq!(
            *journal.lock(),
            vec![
                "front-sd:startup".to_string(),
                "front-sd:shutdown".to_string(),
                "card-b:startup".to_string()
            ]
        );
    }

    #[tokio::test]
    async fn test_removed_backend_is_released_before_candidates() {
        let dir = tempfile::tempdir().unwrap();
        let journal = Journal::default();
        let front = FakeBackend::quirky("front-sd", &dir.path().join("front"), &journal);
        let card_a = FakeBackend::new("card-a", &dir.path().join("a"), &journal);

        let manager = manager(vec![front.clone(), card_a], vec![]);
        assert_eq!(manager.mount(LogicalSlot::Sd).await.unwrap().backend(), "front-sd");

        front.set_present(false);
        wait_for_removal(&manager, LogicalSlot::Sd).await;
        assert_eq!(manager.state(LogicalSlot::Sd).await, MountState::Unmounted);

        journal.lock().clear();
        let outcome = manager.mount(LogicalSlot::Sd).await.unwrap();
        assert_eq!(outcome, MountOutcome::Mounted("card-a".to_string()));

        assert_eq!(
            *journal.lock(),
            vec![
                // deferred unmount, then the reinit cycle of the quirky card
                "front-sd:shutdown".to_string(),
                "front-sd:shutdown".to_string(),
                "front-sd:startup".to_string(),
                // candidates in priority order
                "front-sd:startup".to_string(),
                "card-a:startup".to_string(),
            ]
        );
        assert!(manager.pending_unmount(LogicalSlot::Sd).await.is_none());
    }

    #[tokio::test]
    async fn test_reinserted_media_mounts_again() {
        let dir = tempfile::tempdir().unwrap();
        let journal = Journal::default();
        let usb = FakeBackend::new("usb", dir.path(), &journal);

        let manager = manager(vec![], vec![usb.clone()]);
        manager.mount(LogicalSlot::Usb).await.unwrap();

        usb.set_present(false);
        wait_for_removal(&manager, LogicalSlot::Usb).await;
        usb.set_present(true);

        assert_eq!(
            manager.mount(LogicalSlot::Usb).await.unwrap(),
            MountOutcome::Mounted("usb".to_string())
        );
    }

    #[tokio::test]
    async fn test_never_two_backends_on_one_slot() {
        let dir = tempfile::tempdir().unwrap();
        let journal = Journal::default();
        let front = FakeBackend::new("front-sd", &dir.path().join("front"), &journal);
        let card_a = FakeBackend::new("card-a", &dir.path().join("a"), &journal);

        let manager = manager(vec![front.clone(), card_a.clone()], vec![]);
        for round in 0..4 {
            let present_front = round % 2 == 0;
            front.set_present(present_front);
            let _ = manager.mount(LogicalSlot::Sd).await;

            let mounted: Vec<_> = manager
                .table
                .mounted_backends()
                .into_iter()
                .filter(|(slot, _)| *slot == LogicalSlot::Sd)
                .collect();
            assert!(mounted.len() <= 1);

            if manager.state(LogicalSlot::Sd).await.is_mounted() {
                front.set_present(false);
                card_a.set_present(false);
                wait_for_removal(&manager, LogicalSlot::Sd).await;
                card_a.set_present(true);
            }
        }
    }

    #[tokio::test]
    async fn test_mount_path_and_unmount() {
        let dir = tempfile::tempdir().unwrap();
        let journal = Journal::default();
        let usb = FakeBackend::new("usb", dir.path(), &journal);
        let manager = manager(vec![], vec![usb]);

        assert!(manager.mount_path("usb:/wii64/roms").await.is_ok());
        assert!(matches!(
            manager.mount_path("dvd:/").await,
            Err(StorageError::UnknownSlot(_))
        ));
        assert!(matches!(
            manager.unmount(LogicalSlot::Usb).await,
            Err(StorageError::Unsupported(_))
        ));
        assert!(manager.state(LogicalSlot::Usb).await.is_mounted());
    }
}
