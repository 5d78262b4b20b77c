//! Device registry: priority-ordered backends per slot

use std::sync::Arc;

use super::backend::{BackendConfig, DirBackend, StorageBackend};
use super::types::LogicalSlot;
use crate::config::StorageConfig;

/// Static backend lists, one per logical slot
///
/// Order is priority: mount tries the first entry first.
#[derive(Clone, Default)]
pub struct DeviceRegistry {
    sd: Vec<Arc<dyn StorageBackend>>,
    usb: Vec<Arc<dyn StorageBackend>>,
}

impl DeviceRegistry {
    pub fn new(sd: Vec<Arc<dyn StorageBackend>>, usb: Vec<Arc<dyn StorageBackend>>) -> Self {
        Self { sd, usb }
    }

    /// Build directory backends from configuration
    pub fn from_config(config: &StorageConfig) -> Self {
        fn build(list: &[BackendConfig]) -> Vec<Arc<dyn StorageBackend>> {
            list.iter()
                .map(|c| Arc::new(DirBackend::new(c)) as Arc<dyn StorageBackend>)
                .collect()
        }

        Self::new(build(&config.sd), build(&config.usb))
    }

    /// Candidates for a slot in priority order
    pub fn candidates(&self, slot: LogicalSlot) -> &[Arc<dyn StorageBackend>] {
        match slot {
            LogicalSlot::Sd => &self.sd,
            LogicalSlot::Usb => &self.usb,
        }
    }

    /// Candidates for the slot a logical path selects
    pub fn for_path(&self, path: &str) -> Option<&[Arc<dyn StorageBackend>]> {
        LogicalSlot::from_path(path).map(|slot| self.candidates(slot))
    }

    /// Names of a slot's candidates, in priority order
    pub fn names(&self, slot: LogicalSlot) -> Vec<&str> {
        self.candidates(slot).iter().map(|b| b.name()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_priority_order() {
        let registry = DeviceRegistry::from_config(&StorageConfig::default());

        assert_eq!(
            registry.names(LogicalSlot::Sd),
            vec!["front-sd", "card-a", "card-b"]
        );
        assert_eq!(registry.names(LogicalSlot::Usb), vec!["usb"]);
    }

    #[test]
    fn test_for_path() {
        let registry = DeviceRegistry::from_config(&StorageConfig::default());

        let sd = registry.for_path("sd:/wii64/saves").unwrap();
        assert_eq!(sd.len(), 3);
        assert_eq!(registry.for_path("usb:/").unwrap()[0].name(), "usb");
        assert!(registry.for_path("/wii64").is_none());
    }
}
