//! Storage data types and structures

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Logical storage slot
///
/// A slot is a storage role. Each one maps to a priority list of
/// hardware backends and to a volume name used as the path prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogicalSlot {
    /// SD card family (front slot and memory card adapters)
    Sd,
    /// USB mass storage
    Usb,
}

impl LogicalSlot {
    pub const ALL: [LogicalSlot; 2] = [LogicalSlot::Sd, LogicalSlot::Usb];

    /// Select the slot from the first character of a logical path
    ///
    /// `sd:/wii64/roms` selects [`LogicalSlot::Sd`], `usb:/...` selects
    /// [`LogicalSlot::Usb`]. Anything else selects nothing.
    pub fn from_path(path: &str) -> Option<Self> {
        match path.as_bytes().first() {
            Some(b's') => Some(Self::Sd),
            Some(b'u') => Some(Self::Usb),
            _ => None,
        }
    }

    /// Volume name the filesystem driver maps this slot under
    pub fn volume(&self) -> &'static str {
        match self {
            Self::Sd => "sd",
            Self::Usb => "usb",
        }
    }
}

impl fmt::Display for LogicalSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.volume())
    }
}

/// Mount state of one slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "backend", rename_all = "snake_case")]
pub enum MountState {
    Unmounted,
    /// Mounted on the named backend
    MountedOn(String),
}

impl MountState {
    pub fn is_mounted(&self) -> bool {
        matches!(self, Self::MountedOn(_))
    }
}

/// Successful result of a mount request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MountOutcome {
    /// A candidate backend was started and mapped
    Mounted(String),
    /// The slot was already mounted on this backend, nothing changed
    AlreadyMounted(String),
}

impl MountOutcome {
    pub fn backend(&self) -> &str {
        match self {
            Self::Mounted(name) | Self::AlreadyMounted(name) => name,
        }
    }
}

/// Per-slot status snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotStatus {
    pub slot: LogicalSlot,
    pub state: MountState,
    /// Backend removed while mounted, waiting for the next mount to release it
    pub pending_unmount: Option<String>,
    /// When the current backend was mounted
    pub mounted_at: Option<DateTime<Utc>>,
}

/// Directory entry attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Directory,
}

/// One entry of a directory listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    /// Absolute logical path (`parent + "/" + name`)
    pub path: String,
    /// Size in bytes
    pub size: u64,
    pub kind: EntryKind,
}

impl DirEntry {
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }

    /// Last path component
    pub fn name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }

    /// Create a file handle positioned at the start of this entry
    pub fn open(&self) -> FileHandle {
        FileHandle::with_size(self.path.clone(), self.size)
    }
}

/// Seek origin
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekMode {
    /// cursor = offset
    Set,
    /// cursor += offset
    Current,
    /// cursor = size + offset
    End,
}

/// A file addressed by logical path
///
/// A handle holds no OS resource. Each read or write opens the
/// underlying file, transfers at `offset`, and closes it again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHandle {
    pub path: String,
    /// Byte cursor
    pub offset: i64,
    /// Cached size in bytes
    pub size: u64,
}

impl FileHandle {
    pub fn new(path: impl Into<String>) -> Self {
        Self::with_size(path, 0)
    }

    pub fn with_size(path: impl Into<String>, size: u64) -> Self {
        Self {
            path: path.into(),
            offset: 0,
            size,
        }
    }

    /// Move the cursor. Pure arithmetic, never fails.
    ///
    /// Arithmetic wraps like the fixed-width cursor of the storage driver,
    /// so `Set(o)` followed by `Current(d)` always equals `Set(o + d)`.
    pub fn seek(&mut self, offset: i64, mode: SeekMode) {
        self.offset = match mode {
            SeekMode::Set => offset,
            SeekMode::Current => self.offset.wrapping_add(offset),
            SeekMode::End => (self.size as i64).wrapping_add(offset),
        };
    }
}

/// How the file browser brackets I/O with monitor pauses
///
/// While a real-time consumer (a running game) is active, pausing the
/// presence monitor around every read would glitch it, so reads and writes
/// skip the pause. Directory listings and stream close always pause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    #[default]
    Interactive,
    ActiveSession,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_from_path() {
        assert_eq!(LogicalSlot::from_path("sd:/wii64/roms"), Some(LogicalSlot::Sd));
        assert_eq!(LogicalSlot::from_path("usb:/wii64"), Some(LogicalSlot::Usb));
        assert_eq!(LogicalSlot::from_path("dvd:/"), None);
        assert_eq!(LogicalSlot::from_path(""), None);
    }

    #[test]
    fn test_seek_modes() {
        let mut file = FileHandle::with_size("sd:/rom.z64", 100);

        file.seek(10, SeekMode::Set);
        assert_eq!(file.offset, 10);

        file.seek(5, SeekMode::Current);
        assert_eq!(file.offset, 15);

        file.seek(-20, SeekMode::End);
        assert_eq!(file.offset, 80);

        file.seek(0, SeekMode::End);
        assert_eq!(file.offset, 100);
    }

    #[test]
    fn test_seek_set_then_current_matches_set_sum() {
        let values = [0i64, 1, -1, 7, -300, 4096, i64::MAX, i64::MIN];
        for &o in &values {
            for &d in &values {
                let mut a = FileHandle::with_size("sd:/a", 64);
                a.seek(o, SeekMode::Set);
                a.seek(d, SeekMode::Current);

                let mut b = FileHandle::with_size("sd:/a", 64);
                b.seek(o.wrapping_add(d), SeekMode::Set);

                assert_eq!(a.offset, b.offset, "o={} d={}", o, d);
            }
        }
    }

    #[test]
    fn test_entry_name_and_open() {
        let entry = DirEntry {
            path: "sd:/wii64/roms/mario.z64".to_string(),
            size: 8 * 1024 * 1024,
            kind: EntryKind::File,
        };
        assert_eq!(entry.name(), "mario.z64");
        assert!(!entry.is_dir());

        let handle = entry.open();
        assert_eq!(handle.offset, 0);
        assert_eq!(handle.size, entry.size);
    }

    #[test]
    fn test_mount_state_serialization() {
        let json = serde_json::to_string(&MountState::MountedOn("card-a".into())).unwrap();
        assert_eq!(json, r#"{"state":"mounted_on","backend":"card-a"}"#);
    }
}
