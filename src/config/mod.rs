//! Configuration
//!
//! Loaded from a TOML file, cached for lock-free reads.

mod schema;
mod store;

pub use schema::{AppConfig, LocationsConfig, StorageConfig};
pub use store::ConfigStore;
