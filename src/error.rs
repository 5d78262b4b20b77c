use thiserror::Error;

use crate::storage::LogicalSlot;

/// Storage error type
///
/// Every failure in this crate is a local, recoverable value. A short read
/// or write is not an error (it comes back as `Ok(n)` with a smaller `n`),
/// and mounting an already mounted slot is reported as a success.
#[derive(Error, Debug)]
pub enum StorageError {
    /// No candidate backend of the slot could be started and mapped
    #[error("No storage device present in {slot} slot")]
    DeviceAbsent { slot: LogicalSlot },

    /// The path does not resolve under the current mounts
    #[error("Failed to open {path}: {source}")]
    OpenFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The path prefix does not select any logical slot
    #[error("Path does not name a storage slot: {0}")]
    UnknownSlot(String),

    #[error("Operation not supported: {0}")]
    Unsupported(&'static str),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl StorageError {
    pub(crate) fn open_failed(path: impl Into<String>, source: std::io::Error) -> Self {
        Self::OpenFailed {
            path: path.into(),
            source,
        }
    }

    /// Short machine readable code, used in events and throttle keys
    pub fn code(&self) -> &'static str {
        match self {
            Self::DeviceAbsent { .. } => "device_absent",
            Self::OpenFailed { .. } => "open_failed",
            Self::UnknownSlot(_) => "unknown_slot",
            Self::Unsupported(_) => "unsupported",
            Self::Io(_) => "io_error",
            Self::Config(_) => "config_error",
        }
    }
}

/// Result type alias for storage operations
pub type Result<T> = std::result::Result<T, StorageError>;
