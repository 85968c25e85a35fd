//! Engine configuration
//!
//! Loaded once at startup from a JSON file, or built from defaults.
//! The engine is a library, so nothing here reads CLI flags; the host
//! process decides where the config file lives.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Milliseconds a caller waits on a per-entity lock before giving up.
const DEFAULT_LOCK_TIMEOUT_MS: u64 = 2_000;

/// How many numbered pre-migration backups to keep before evicting the oldest.
const DEFAULT_BACKUP_CAP: usize = 3;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Path of the SQLite store.
    pub db_path: PathBuf,

    /// Bounded wait for per-entity name locks, in milliseconds.
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,

    /// Rotation cap for pre-migration backups.
    #[serde(default = "default_backup_cap")]
    pub backup_cap: usize,
}

fn default_lock_timeout_ms() -> u64 {
    DEFAULT_LOCK_TIMEOUT_MS
}

fn default_backup_cap() -> usize {
    DEFAULT_BACKUP_CAP
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            lock_timeout_ms: DEFAULT_LOCK_TIMEOUT_MS,
            backup_cap: DEFAULT_BACKUP_CAP,
        }
    }
}

impl EngineConfig {
    /// Load from a JSON config file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(EngineError::Io)?;
        let config: EngineConfig = serde_json::from_str(&raw)
            .map_err(|e| EngineError::Config(format!("{}: {}", path.display(), e)))?;
        Ok(config)
    }

    /// A config pointing at an explicit database path, defaults elsewhere.
    pub fn with_db_path(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            ..Self::default()
        }
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

/// Default store location under the platform data directory.
fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("tagcabinet")
        .join("index.db")
}
