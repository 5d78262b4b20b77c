use arc_swap::ArcSwap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use super::AppConfig;
use crate::error::{Result, StorageError};

/// Configuration store backed by a TOML file
///
/// Uses `ArcSwap` for lock-free reads. A missing file means defaults;
/// nothing is written until [`set`](Self::set) is called.
#[derive(Clone)]
pub struct ConfigStore {
    path: PathBuf,
    cache: Arc<ArcSwap<AppConfig>>,
}

impl ConfigStore {
    /// Load configuration from `path`
    pub async fn load(path: &Path) -> Result<Self> {
        let config = match tokio::fs::read_to_string(path).await {
            Ok(text) => {
                debug!("Loading configuration from {}", path.display());
                toml::from_str(&text).map_err(|e| {
                    StorageError::Config(format!("{}: {}", path.display(), e))
                })?
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No configuration at {}, using defaults", path.display());
                AppConfig::default()
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path: path.to_path_buf(),
            cache: Arc::new(ArcSwap::from_pointee(config)),
        })
    }

    /// Get current configuration (lock-free)
    pub fn get(&self) -> Arc<AppConfig> {
        self.cache.load_full()
    }

    /// Persist `config` and make it current
    pub async fn set(&self, config: AppConfig) -> Result<()> {
        let text = toml::to_string_pretty(&config)
            .map_err(|e| StorageError::Config(e.to_string()))?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        tokio::fs::write(&self.path, text).await?;
        self.cache.store(Arc::new(config));

        info!("Configuration saved to {}", self.path.display());
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_missing_file_gives_defaults() {
        let dir = tempdir().unwrap();
        let store = ConfigStore::load(&dir.path().join("slotfs.toml"))
            .await
            .unwrap();

        assert_eq!(*store.get(), AppConfig::default());
        assert!(!store.path().exists());
    }

    #[tokio::test]
    async fn test_set_persists() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("etc/slotfs.toml");
        let store = ConfigStore::load(&path).await.unwrap();

        let mut config = (*store.get()).clone();
        config.monitor.grace_period_ms = 2500;
        config.storage.sd.truncate(1);
        store.set(config.clone()).await.unwrap();
        assert_eq!(*store.get(), config);

        let reloaded = ConfigStore::load(&path).await.unwrap();
        assert_eq!(*reloaded.get(), config);
    }

    #[tokio::test]
    async fn test_invalid_file_is_config_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("slotfs.toml");
        std::fs::write(&path, "monitor = 5").unwrap();

        let err = ConfigStore::load(&path).await.err().unwrap();
        assert!(matches!(err, StorageError::Config(_)));
    }
}
