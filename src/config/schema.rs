use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::storage::{BackendConfig, LogicalSlot, MonitorConfig};

/// Main application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Presence monitor timing
    pub monitor: MonitorConfig,
    /// Backends per slot
    pub storage: StorageConfig,
    /// Well-known directories on the media
    pub locations: LocationsConfig,
}

/// Storage backend configuration
///
/// Each list is in priority order: mounting a slot tries the first entry
/// first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SD family backends (front slot, card adapters)
    pub sd: Vec<BackendConfig>,
    /// USB mass storage backends
    pub usb: Vec<BackendConfig>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let mut front_sd = BackendConfig::new("front-sd", "/media/sd");
        // Front slot cards often fail to restart without a full cycle
        front_sd.restart_after_release = true;

        Self {
            sd: vec![
                front_sd,
                BackendConfig::new("card-a", "/media/card-a"),
                BackendConfig::new("card-b", "/media/card-b"),
            ],
            usb: vec![BackendConfig::new("usb", PathBuf::from("/media/usb"))],
        }
    }
}

/// ROM and save directories per slot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocationsConfig {
    pub sd_roms: String,
    pub sd_saves: String,
    pub usb_roms: String,
    pub usb_saves: String,
}

impl Default for LocationsConfig {
    fn default() -> Self {
        Self {
            sd_roms: "sd:/wii64/roms".to_string(),
            sd_saves: "sd:/wii64/saves".to_string(),
            usb_roms: "usb:/wii64/roms".to_string(),
            usb_saves: "usb:/wii64/saves".to_string(),
        }
    }
}

impl LocationsConfig {
    /// Top level ROM directory of a slot
    pub fn roms(&self, slot: LogicalSlot) -> &str {
        match slot {
            LogicalSlot::Sd => &self.sd_roms,
            LogicalSlot::Usb => &self.usb_roms,
        }
    }

    /// Save directory of a slot
    pub fn saves(&self, slot: LogicalSlot) -> &str {
        match slot {
            LogicalSlot::Sd => &self.sd_saves,
            LogicalSlot::Usb => &self.usb_saves,
        }
    }
}
