//! File browser over mounted slots
//!
//! Every call that touches the driver pauses the presence monitor first
//! and resumes it on the way out, error paths included.

use std::io::{self, Read, Seek, SeekFrom, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

use super::fs::{FileStream, FileSystem};
use super::manager::MountManager;
use super::monitor::MonitorPause;
use super::types::{DirEntry, EntryKind, FileHandle, MountOutcome, SeekMode, SessionMode};
use crate::error::{Result, StorageError};

/// File browser
///
/// Cheap to clone; clones share the session mode.
#[derive(Clone)]
pub struct FileBrowser {
    mounts: Arc<MountManager>,
    active_session: Arc<AtomicBool>,
}

impl FileBrowser {
    pub fn new(mounts: Arc<MountManager>) -> Self {
        Self {
            mounts,
            active_session: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn mounts(&self) -> &Arc<MountManager> {
        &self.mounts
    }

    pub fn mode(&self) -> SessionMode {
        if self.active_session.load(Ordering::Acquire) {
            SessionMode::ActiveSession
        } else {
            SessionMode::Interactive
        }
    }

    /// Switch session mode for this browser and its streams
    pub fn set_mode(&self, mode: SessionMode) {
        debug!("File browser session mode: {:?}", mode);
        self.active_session
            .store(mode == SessionMode::ActiveSession, Ordering::Release);
    }

    fn fs(&self) -> &dyn FileSystem {
        self.mounts.filesystem().as_ref()
    }

    /// Mount the slot selected by a logical path (`sd:/...`, `usb:/...`)
    pub async fn mount(&self, path: &str) -> Result<MountOutcome> {
        self.mounts.mount_path(path).await
    }

    async fn pause(&self) -> MonitorPause<'_> {
        self.mounts.monitor().pause().await
    }

    /// Pause unless a real-time session is running
    async fn pause_for_io(&self) -> Option<MonitorPause<'_>> {
        match self.mode() {
            SessionMode::Interactive => Some(self.pause().await),
            SessionMode::ActiveSession => None,
        }
    }

    /// List a directory
    ///
    /// Entry paths are `path + "/" + name`. Every entry the driver reports
    /// is returned; an entry that fails to read is logged and skipped.
    pub async fn read_directory(&self, path: &str) -> Result<Vec<DirEntry>> {
        let _pause = self.pause().await;

        let dir = self
            .fs()
            .open_dir(path)
            .map_err(|e| StorageError::open_failed(path, e))?;

        let parent = path.trim_end_matches('/');
        let mut entries = Vec::with_capacity(2);
        for raw in dir {
            match raw {
                Ok(raw) => entries.push(DirEntry {
                    path: format!("{}/{}", parent, raw.name),
                    size: raw.size,
                    kind: if raw.is_dir {
                        EntryKind::Directory
                    } else {
                        EntryKind::File
                    },
                }),
                Err(e) => {
                    warn!("Skipping unreadable entry in {}: {}", path, e);
                }
            }
        }

        debug!("Listed {} entries in {}", entries.len(), path);
        Ok(entries)
    }

    /// Move a handle's cursor; no I/O
    pub fn seek(&self, file: &mut FileHandle, offset: i64, mode: SeekMode) {
        file.seek(offset, mode);
    }

    /// Read up to `buffer.len()` bytes at the handle's cursor
    ///
    /// Returns the number of bytes read, which is 0 at end of file and may
    /// be short of the buffer length. The cursor advances by that amount.
    pub async fn read(&self, file: &mut FileHandle, buffer: &mut [u8]) -> Result<usize> {
        let _pause = self.pause_for_io().await;

        let mut stream = self
            .fs()
            .open_read(&file.path)
            .map_err(|e| StorageError::open_failed(&file.path, e))?;
        let n = read_at(stream.as_mut(), file.offset, buffer)?;
        file.offset += n as i64;
        Ok(n)
    }

    /// Write `buffer` at the handle's cursor
    ///
    /// The file is opened for overwrite: whatever it held before this call
    /// is discarded, bytes before the cursor read back as zeros.
    pub async fn write(&self, file: &mut FileHandle, buffer: &[u8]) -> Result<usize> {
        let _pause = self.pause_for_io().await;

        let mut stream = self
            .fs()
            .open_write(&file.path)
            .map_err(|e| StorageError::open_failed(&file.path, e))?;
        let n = write_at(stream.as_mut(), file.offset, buffer)?;
        stream.flush()?;
        file.offset += n as i64;
        // The open truncated the file, so it now ends at the cursor
        file.size = file.offset.max(0) as u64;
        Ok(n)
    }

    /// Streaming reader for one long sequential load
    pub fn stream(&self, file: FileHandle) -> StreamReader {
        StreamReader {
            browser: self.clone(),
            file,
            stream: None,
        }
    }
}

/// Reader that keeps its file open across calls
///
/// Used for loading large images: the file is opened on the first read and
/// held until [`close`](Self::close).
pub struct StreamReader {
    browser: FileBrowser,
    file: FileHandle,
    stream: Option<Box<dyn FileStream>>,
}

impl StreamReader {
    pub fn handle(&self) -> &FileHandle {
        &self.file
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    pub fn seek(&mut self, offset: i64, mode: SeekMode) {
        self.file.seek(offset, mode);
    }

    pub async fn read(&mut self, buffer: &mut [u8]) -> Result<usize> {
        let _pause = self.browser.pause_for_io().await;

        let stream = match self.stream {
            Some(ref mut stream) => stream,
            None => {
                let opened = self
                    .browser
                    .fs()
                    .open_read(&self.file.path)
                    .map_err(|e| StorageError::open_failed(&self.file.path, e))?;
                debug!("Opened stream {}", self.file.path);
                self.stream.insert(opened)
            }
        };

        let n = read_at(stream.as_mut(), self.file.offset, buffer)?;
        self.file.offset += n as i64;
        Ok(n)
    }

    /// Release the held file, if any. Always pauses the monitor.
    pub async fn close(&mut self) {
        let _pause = self.browser.pause().await;
        if self.stream.take().is_some() {
            debug!("Closed stream {}", self.file.path);
        }
    }
}

fn start_position(offset: i64) -> io::Result<SeekFrom> {
    u64::try_from(offset)
        .map(SeekFrom::Start)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "negative file offset"))
}

/// Read from `offset` until `buffer` is full or the file ends
fn read_at(stream: &mut dyn FileStream, offset: i64, buffer: &mut [u8]) -> io::Result<usize> {
    stream.seek(start_position(offset)?)?;
    let mut total = 0;
    while total < buffer.len() {
        match stream.read(&mut buffer[total..]) {
            Ok(0) => break,
            Ok(n) => total += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(total)
}

/// Write at `offset` until `buffer` is consumed or the device takes no more
fn write_at(stream: &mut dyn FileStream, offset: i64, buffer: &[u8]) -> io::Result<usize> {
    stream.seek(start_position(offset)?)?;
    let mut total = 0;
    while total < buffer.len() {
        match stream.write(&buffer[total..]) {
            Ok(0) => break,
            Ok(n) => total += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(total)
}
