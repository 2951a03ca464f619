//! File-based snapshots of scheduler state.

use std::path::{Path, PathBuf};

use serde::{Serialize, de::DeserializeOwned};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Name of the queue status snapshot written on housekeeping ticks.
pub const QUEUE_STATUS_SNAPSHOT: &str = "queue_status";

/// Writes JSON snapshots into a directory.
///
/// Snapshots are for observability only; the scheduler never reads them back.
#[derive(Debug, Clone)]
pub struct StatePersistence {
    base_dir: PathBuf,
}

impl StatePersistence {
    pub fn new(base_dir: impl AsRef<Path>) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Ensure the base directory exists.
    pub async fn init(&self) -> Result<(), PersistenceError> {
        fs::create_dir_all(&self.base_dir).await?;
        Ok(())
    }

    /// Save `state` as `<name>.json`, replacing any previous snapshot.
    pub async fn save<T: Serialize>(&self, name: &str, state: &T) -> Result<(), PersistenceError> {
        let path = self.base_dir.join(format!("{}.json", name));
        let json = serde_json::to_string_pretty(state)?;

        // Write to temp file first, then rename for atomicity
        let temp_path = self.base_dir.join(format!("{}.json.tmp", name));
        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(json.as_bytes()).await?;
        file.sync_all().await?;
        fs::rename(&temp_path, &path).await?;

        tracing::debug!("Saved snapshot to {:?}", path);
        Ok(())
    }

    /// Load the snapshot called `name`, if one was written.
    pub async fn load<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>, PersistenceError> {
        let path = self.base_dir.join(format!("{}.json", name));

        if !fs::try_exists(&path).await? {
            return Ok(None);
        }

        let mut file = fs::File::open(&path).await?;
        let mut json = String::new();
        file.read_to_string(&mut json).await?;

        Ok(Some(serde_json::from_str(&json)?))
    }
}

/// Snapshot errors.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
