use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use crate::merge::DEFAULT_BATCH_SIZE;
use crate::prepare::PersistOptions;
use crate::storage::StoreOptions;

const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5000;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TaintstoreConfig {
    pub database: Option<String>,
    /// Parameters bound per key lookup
    pub batch_size: Option<usize>,
    pub busy_timeout_ms: Option<u64>,
    /// Resync counters to the stored maximum on every ingest
    pub resync_counters: Option<bool>,
}

impl TaintstoreConfig {
    pub fn persist_options(&self) -> PersistOptions {
        PersistOptions {
            batch_size: self.batch_size.unwrap_or(DEFAULT_BATCH_SIZE),
            use_lock: self.resync_counters.unwrap_or(false),
        }
    }

    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            busy_timeout: Duration::from_millis(self.busy_timeout_ms.unwrap_or(DEFAULT_BUSY_TIMEOUT_MS)),
        }
    }
}

pub fn default_config_path() -> PathBuf {
    PathBuf::from("taintstore.toml")
}

pub fn default_database_path_in(base: &Path) -> PathBuf {
    base.join(".taintstore").join("taintstore.db")
}

pub fn load_config(path: Option<&Path>) -> anyhow::Result<Option<TaintstoreConfig>> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(default_config_path);
    if !path.exists() {
        return Ok(None);
    }

    let contents = std::fs::read_to_string(&path)?;
    let config: TaintstoreConfig = toml::from_str(&contents)?;
    if config.batch_size == Some(0) {
        anyhow::bail!("batch_size in {} must be at least 1", path.display());
    }
    Ok(Some(config))
}

pub fn write_config(path: &Path, config: &TaintstoreConfig, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!("config already exists at {} (use --force to overwrite)", path.display());
    }

    let contents = toml::to_string_pretty(config)?;
    std::fs::write(path, contents)?;
    Ok(())
}

pub fn ensure_db_dir(db_path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}
