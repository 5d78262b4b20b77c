//! Storage backend trait definition

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

/// Storage backend trait
///
/// A backend is one hardware storage interface: a card slot, an adapter
/// or a USB controller.
pub trait StorageBackend: Send + Sync {
    /// Get backend name
    fn name(&self) -> &str;

    /// Check whether media is physically present. Must not block.
    fn is_present(&self) -> bool;

    /// Bring the interface up. Returns `false` if no usable media.
    fn startup(&self) -> bool;

    /// Take the interface down
    fn shutdown(&self);

    /// Prepare the interface for reuse after it was released
    ///
    /// Called right after `shutdown()` during a deferred unmount. Some
    /// hardware refuses to start again unless it went through a full
    /// shutdown/startup cycle first; those backends do that cycle here.
    fn reset(&self) {}

    /// Location the filesystem driver maps when this backend is mounted
    fn media_root(&self) -> &Path;
}

/// Backend configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Logical backend name (e.g. "front-sd")
    pub name: String,
    /// Directory where the media shows up on the host
    pub media_root: PathBuf,
    /// Cycle shutdown/startup after release; some cards fail without it
    #[serde(default)]
    pub restart_after_release: bool,
}

impl BackendConfig {
    pub fn new(name: impl Into<String>, media_root: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            media_root: media_root.into(),
            restart_after_release: false,
        }
    }
}

/// Backend whose media is a host directory
///
/// Media counts as inserted while the directory exists, which is how
/// auto-mounted cards and sticks appear under `/media`.
pub struct DirBackend {
    name: String,
    media_root: PathBuf,
    restart_after_release: bool,
    started: AtomicBool,
}

impl DirBackend {
    pub fn new(config: &BackendConfig) -> Self {
        Self {
            name: config.name.clone(),
            media_root: config.media_root.clone(),
            restart_after_release: config.restart_after_release,
            started: AtomicBool::new(false),
        }
    }

    /// Whether `startup()` succeeded and no `shutdown()` followed
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }
}

impl StorageBackend for DirBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_present(&self) -> bool {
        self.media_root.is_dir()
    }

    fn startup(&self) -> bool {
        let present = self.is_present();
        self.started.store(present, Ordering::Release);
        if !present {
            debug!(
                "Backend {} has no media at {}",
                self.name,
                self.media_root.display()
            );
        }
        present
    }

    fn shutdown(&self) {
        self.started.store(false, Ordering::Release);
    }

    fn reset(&self) {
        if self.restart_after_release {
            debug!("Cycling backend {} after release", self.name);
            self.shutdown();
            self.startup();
        }
    }

    fn media_root(&self) -> &Path {
        &self.media_root
    }
}
