//! Removable storage module
//!
//! Mounts pluggable media (SD card slots, USB) and exposes it to the
//! front end as a file browser:
//! - Mount with fallback over a priority list of backends per slot
//! - Background presence monitor with deferred unmount on removal
//! - Directory listing and cursor based read/write/seek
//!
//! Architecture:
//! ```text
//! GUI / CLI --> FileBrowser --> FileSystem driver --> media
//!                   |                  ^
//!             MountManager ------------+
//!              |        |
//!       DeviceRegistry  PresenceMonitor (pause/resume handshake)
//! ```

pub mod backend;
pub mod browser;
pub mod fs;
pub mod manager;
pub mod monitor;
pub mod registry;
pub mod table;
pub mod types;

pub use backend::{BackendConfig, DirBackend, StorageBackend};
pub use browser::{FileBrowser, StreamReader};
pub use fs::{FileSystem, HostFileSystem};
pub use manager::MountManager;
pub use monitor::{MonitorConfig, MonitorPause, MonitorState, PresenceMonitor};
pub use registry::DeviceRegistry;
pub use table::MountTable;
pub use types::{
    DirEntry, EntryKind, FileHandle, LogicalSlot, MountOutcome, MountState, SeekMode,
    SessionMode, SlotStatus,
};
