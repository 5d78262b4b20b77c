//! Filesystem driver seam
//!
//! The browser never touches files directly. It goes through a
//! [`FileSystem`], which maps volume names (`sd`, `usb`) onto mounted
//! backends and exposes directory iteration and POSIX-like streams.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, Write};
use std::path::{Component, Path, PathBuf};
use tracing::debug;

use super::backend::StorageBackend;

/// Raw directory entry as reported by the driver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDirEntry {
    pub name: String,
    pub size: u64,
    pub is_dir: bool,
}

/// Open file stream
pub trait FileStream: Read + Write + Seek + Send {}

impl<T: Read + Write + Seek + Send> FileStream for T {}

/// Directory iterator; dropping it closes the directory
pub type DirIter = Box<dyn Iterator<Item = io::Result<RawDirEntry>> + Send>;

/// Filesystem driver trait
pub trait FileSystem: Send + Sync {
    /// Map `volume` onto the backend's media. Returns `false` on failure.
    fn mount(&self, volume: &str, backend: &dyn StorageBackend) -> bool;

    /// Drop the mapping of `volume`, if any
    fn unmount(&self, volume: &str);

    /// Open a directory for iteration
    fn open_dir(&self, path: &str) -> io::Result<DirIter>;

    /// Open a file for reading
    fn open_read(&self, path: &str) -> io::Result<Box<dyn FileStream>>;

    /// Open a file for writing, discarding its previous contents
    fn open_write(&self, path: &str) -> io::Result<Box<dyn FileStream>>;
}

/// Driver backed by host directories
#[derive(Default)]
pub struct HostFileSystem {
    volumes: RwLock<HashMap<String, PathBuf>>,
}

impl HostFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `volume` is currently mapped
    pub fn is_mounted(&self, volume: &str) -> bool {
        self.volumes.read().contains_key(volume)
    }

    /// Translate `volume:/a/b` into a host path under the volume root
    fn resolve(&self, path: &str) -> io::Result<PathBuf> {
        let (volume, rest) = path.split_once(':').ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "path has no volume prefix")
        })?;

        let root = self.volumes.read().get(volume).cloned().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("volume {} is not mounted", volume),
            )
        })?;

        let relative = Path::new(rest.trim_start_matches('/'));
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "path escapes its volume",
            ));
        }

        Ok(root.join(relative))
    }
}

impl FileSystem for HostFileSystem {
    fn mount(&self, volume: &str, backend: &dyn StorageBackend) -> bool {
        let root = backend.media_root();
        if !root.is_dir() {
            debug!(
                "Cannot map volume {}: {} is not a directory",
                volume,
                root.display()
            );
            return false;
        }
        self.volumes
            .write()
            .insert(volume.to_string(), root.to_path_buf());
        true
    }

    fn unmount(&self, volume: &str) {
        self.volumes.write().remove(volume);
    }

    fn open_dir(&self, path: &str) -> io::Result<DirIter> {
        let dir = fs::read_dir(self.resolve(path)?)?;
        Ok(Box::new(dir.map(|entry| {
            let entry = entry?;
            let metadata = entry.metadata()?;
            Ok(RawDirEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                size: metadata.len(),
                is_dir: metadata.is_dir(),
            })
        })))
    }

    fn open_read(&self, path: &str) -> io::Result<Box<dyn FileStream>> {
        let file = File::open(self.resolve(path)?)?;
        Ok(Box::new(file))
    }

    fn open_write(&self, path: &str) -> io::Result<Box<dyn FileStream>> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(self.resolve(path)?)?;
        Ok(Box::new(file))
    }
}
