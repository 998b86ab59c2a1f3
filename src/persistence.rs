//! Checkpoint persistence
//!
//! Durable get/set of the four checkpoints across process restarts. Values are
//! stored under the settings keys the host app has always used, as RFC 3339
//! strings; a missing key means the checkpoint is unset.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio::sync::RwLock;

use crate::checkpoint::CheckpointSet;
use crate::error::PersistenceError;
use crate::types::Timestamp;

pub const KEY_LAST_CHECKED: &str = "last_checked";
pub const KEY_LAST_UPDATED: &str = "last_updated";
pub const KEY_LAST_OPENED: &str = "last_opened";
pub const KEY_LAST_OPENED_OLD: &str = "last_opened_old";

/// Persistence collaborator for [`CheckpointSet`].
#[async_trait]
pub trait CheckpointPersistence: Send + Sync {
    /// Load the stored checkpoints; nothing stored yet is an all-unset set.
    async fn load(&self) -> Result<CheckpointSet, PersistenceError>;

    async fn save(&self, checkpoints: &CheckpointSet) -> Result<(), PersistenceError>;
}

// ── Key/value encoding ──

/// Flatten checkpoints into their settings keys.
pub fn to_entries(checkpoints: &CheckpointSet) -> BTreeMap<String, String> {
    [
        (KEY_LAST_CHECKED, checkpoints.last_checked()),
        (KEY_LAST_UPDATED, checkpoints.last_updated()),
        (KEY_LAST_OPENED, checkpoints.last_opened()),
        (KEY_LAST_OPENED_OLD, checkpoints.last_opened_old()),
    ]
    .into_iter()
    .filter_map(|(key, value)| value.map(|v| (key.to_string(), v.to_rfc3339())))
    .collect()
}

/// Rebuild checkpoints from settings keys. Unknown keys are ignored.
pub fn from_entries(entries: &BTreeMap<String, String>) -> Result<CheckpointSet, PersistenceError> {
    let get = |key: &str| -> Result<Option<Timestamp>, PersistenceError> {
        entries
            .get(key)
            .map(|value| {
                DateTime::parse_from_rfc3339(value)
                    .map(|dt| dt.with_timezone(&Utc))
                    .map_err(|_| PersistenceError::InvalidTimestamp {
                        key: key.to_string(),
                        value: value.clone(),
                    })
            })
            .transpose()
    };

    Ok(CheckpointSet::restore(
        get(KEY_LAST_CHECKED)?,
        get(KEY_LAST_UPDATED)?,
        get(KEY_LAST_OPENED)?,
        get(KEY_LAST_OPENED_OLD)?,
    ))
}

// ── MemoryCheckpointPersistence ──

/// In-memory persistence for tests and embedding hosts.
#[derive(Debug, Default)]
pub struct MemoryCheckpointPersistence {
    inner: RwLock<CheckpointSet>,
}

impl MemoryCheckpointPersistence {
    pub fn with_initial(checkpoints: CheckpointSet) -> Self {
        Self {
            inner: RwLock::new(checkpoints),
        }
    }

    /// The last saved value.
    pub async fn stored(&self) -> CheckpointSet {
        *self.inner.read().await
    }
}

#[async_trait]
impl CheckpointPersistence for MemoryCheckpointPersistence {
    async fn load(&self) -> Result<CheckpointSet, PersistenceError> {
        Ok(*self.inner.read().await)
    }

    async fn save(&self, checkpoints: &CheckpointSet) -> Result<(), PersistenceError> {
        *self.inner.write().await = *checkpoints;
        Ok(())
    }
}

// ── JsonFileCheckpointPersistence ──

/// Checkpoints kept in a small JSON object on disk.
///
/// Writes go to a sibling temp file and are renamed into place so a crash
/// mid-write never leaves a truncated file behind.
#[derive(Debug, Clone)]
pub struct JsonFileCheckpointPersistence {
    path: PathBuf,
}

impl JsonFileCheckpointPersistence {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl CheckpointPersistence for JsonFileCheckpointPersistence {
    async fn load(&self) -> Result<CheckpointSet, PersistenceError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(CheckpointSet::default());
            }
            Err(e) => return Err(e.into()),
        };

        let entries: BTreeMap<String, String> = serde_json::from_slice(&bytes)?;
        from_entries(&entries)
    }

    async fn save(&self, checkpoints: &CheckpointSet) -> Result<(), PersistenceError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let body = serde_json::to_vec_pretty(&to_entries(checkpoints))?;
        let temp = self.temp_path();
        tokio::fs::write(&temp, body).await?;
        tokio::fs::rename(&temp, &self.path).await?;
        Ok(())
    }
}
