//! `PersistentStore` reference adapter: `NetshieldConfig` as TOML,
//! `PersistedFlags` as JSON, both under the daemon's state directory with
//! `0600` permissions — the same write shape `proxyvpn-state::StateStore`
//! uses for its own state file, split across two files since config is
//! user-edited text and flags are process-internal liveness bits.

use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::sync::Mutex;

use netshield_model::config::{NetshieldConfig, PersistedFlags};
use netshield_ports::PersistentStore;
use netshield_util::set_permissions_0600;

pub struct FilePersistentStore {
    config_path: PathBuf,
    flags_path: PathBuf,
    write_lock: Mutex<()>,
}

impl FilePersistentStore {
    pub fn new(config_path: PathBuf, flags_path: PathBuf) -> Self {
        Self { config_path, flags_path, write_lock: Mutex::new(()) }
    }
}

#[async_trait]
impl PersistentStore for FilePersistentStore {
    async fn load_config(&self) -> Result<NetshieldConfig> {
        match std::fs::read_to_string(&self.config_path) {
            Ok(text) => Ok(toml::from_str(&text).context("parse config.toml")?),
            Err(_) => Ok(NetshieldConfig::default()),
        }
    }

    async fn save_config(&self, config: &NetshieldConfig) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent).context("create config directory")?;
        }
        let text = toml::to_string_pretty(config).context("serialize config")?;
        std::fs::write(&self.config_path, text).context("write config.toml")?;
        set_permissions_0600(&self.config_path)?;
        Ok(())
    }

    async fn load_flags(&self) -> Result<PersistedFlags> {
        match std::fs::read(&self.flags_path) {
            Ok(data) => Ok(serde_json::from_slice(&data).context("parse flags.json")?),
            Err(_) => Ok(PersistedFlags::default()),
        }
    }

    async fn save_flags(&self, flags: &PersistedFlags) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.flags_path.parent() {
            std::fs::create_dir_all(parent).context("create flags directory")?;
        }
        let data = serde_json::to_vec_pretty(flags).context("serialize flags")?;
        std::fs::write(&self.flags_path, data).context("write flags.json")?;
        set_permissions_0600(&self.flags_path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_paths(prefix: &str) -> (PathBuf, PathBuf) {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let dir = std::env::temp_dir();
        (dir.join(format!("{prefix}-config-{now}.toml")), dir.join(format!("{prefix}-flags-{now}.json")))
    }

    #[tokio::test]
    async fn config_round_trips_through_toml() {
        let (config_path, flags_path) = temp_paths("netshield-pstore");
        let store = FilePersistentStore::new(config_path.clone(), flags_path.clone());
        let mut config = NetshieldConfig::default();
        config.allow_critical = true;
        store.save_config(&config).await.unwrap();
        let loaded = store.load_config().await.unwrap();
        assert_eq!(loaded, config);
        let _ = std::fs::remove_file(&config_path);
    }

    #[tokio::test]
    async fn missing_files_yield_defaults() {
        let (config_path, flags_path) = temp_paths("netshield-pstore-missing");
        let store = FilePersistentStore::new(config_path, flags_path);
        assert_eq!(store.load_config().await.unwrap(), NetshieldConfig::default());
        assert_eq!(store.load_flags().await.unwrap(), PersistedFlags::default());
    }

    #[tokio::test]
    async fn flags_round_trip_through_json() {
        let (config_path, flags_path) = temp_paths("netshield-pstore-flags");
        let store = FilePersistentStore::new(config_path, flags_path.clone());
        let mut flags = PersistedFlags::default();
        flags.firewall_enabled = true;
        flags.is_firewall_down = true;
        store.save_flags(&flags).await.unwrap();
        let loaded = store.load_flags().await.unwrap();
        assert_eq!(loaded, flags);
        let _ = std::fs::remove_file(&flags_path);
    }
}
