//! slotfs - removable storage for ROM and save files
//!
//! This crate mounts pluggable media (SD card slots, USB) with
//! priority-ordered fallback, watches it for removal from a background
//! task, and exposes it as a file browser for the console front end.

pub mod config;
pub mod error;
pub mod events;
pub mod storage;
pub mod utils;

pub use error::{Result, StorageError};
