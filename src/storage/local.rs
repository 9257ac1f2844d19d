//! Local filesystem storage implementation.
//!
//! ## Storage Layout
//!
//! ```text
//! {root}/
//! ├── config.toml    # Watcher configuration
//! ├── state.json     # Latest snapshot per course
//! └── errors.json    # Error cool-down records
//! ```
//!
//! Every write goes to a `.tmp` sibling first and is then renamed over the
//! target, so readers only ever see complete documents.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};
use tokio::io::AsyncWriteExt;

use crate::error::{AppError, Result};
use crate::models::SnapshotSet;
use crate::pipeline::ErrorRecord;
use crate::storage::{ErrorData, StateData, StateStore};

const STATE_FILE: &str = "state.json";
const ERRORS_FILE: &str = "errors.json";

/// Local filesystem storage backend.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root_dir: PathBuf,
}

impl LocalStorage {
    /// Create a new LocalStorage rooted at the given directory.
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
        }
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    /// Get the full path for a relative key.
    pub fn path(&self, key: &str) -> PathBuf {
        self.root_dir.join(key)
    }

    /// Ensure parent directory exists.
    async fn ensure_dir(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    /// Write bytes atomically (write to temp, then rename).
    async fn write_bytes(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path(key);
        self.ensure_dir(&path).await?;

        let tmp = path.with_extension("tmp");
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    /// Write JSON data.
    async fn write_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(value)?;
        self.write_bytes(key, &bytes).await
    }

    /// Read bytes, returning None if file doesn't exist.
    async fn read_bytes(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path(key);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AppError::Io(e)),
        }
    }

    /// Read JSON data. Content that does not parse is reported as corrupt state.
    async fn read_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.read_bytes(key).await? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| AppError::corrupt_state(&self.path(key), e)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl StateStore for LocalStorage {
    async fn load_snapshots(&self) -> Result<SnapshotSet> {
        match self.read_json::<StateData>(STATE_FILE).await? {
            Some(data) => {
                log::debug!(
                    "Loaded {} course snapshots saved at {}",
                    data.courses.len(),
                    data.updated_at
                );
                Ok(data.courses)
            }
            None => {
                log::info!("No {} found, starting without prior state", STATE_FILE);
                Ok(SnapshotSet::new())
            }
        }
    }

    async fn save_snapshots(&self, snapshots: &SnapshotSet) -> Result<()> {
        self.write_json(STATE_FILE, &StateData::new(snapshots.clone()))
            .await?;
        log::debug!("Saved {} course snapshots to {}", snapshots.len(), STATE_FILE);
        Ok(())
    }

    async fn load_error_records(&self) -> Result<Vec<ErrorRecord>> {
        Ok(self
            .read_json::<ErrorData>(ERRORS_FILE)
            .await?
            .map(|data| data.records)
            .unwrap_or_default())
    }

    async fn save_error_records(&self, records: &[ErrorRecord]) -> Result<()> {
        self.write_json(ERRORS_FILE, &ErrorData::new(records.to_vec()))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CourseSnapshot, RowSnapshot, TableSnapshot};
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    fn sample_set() -> SnapshotSet {
        let at = Utc.with_ymd_and_hms(2025, 4, 1, 10, 0, 0).unwrap();
        let rows = vec![
            RowSnapshot::from_pairs([("KursnrNo.", "1001"), ("TagDay", "Mo")], "buchen"),
            RowSnapshot::from_pairs([("KursnrNo.", "1002"), ("TagDay", "Di")], "Warteliste"),
        ];
        let snapshot = CourseSnapshot::new(at)
            .with_table(0, TableSnapshot::new("Studio", at, rows))
            .with_table(3, TableSnapshot::new("Leer", at, vec![]));

        let mut set = SnapshotSet::new();
        set.insert("Krafttraining".to_string(), snapshot);
        set
    }

    #[tokio::test]
    async fn test_write_and_read() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());

        storage.write_bytes("test.txt", b"hello").await.unwrap();
        let data = storage.read_bytes("test.txt").await.unwrap();
        assert_eq!(data, Some(b"hello".to_vec()));
        assert!(!storage.path("test.tmp").exists());
    }

    #[tokio::test]
    async fn test_read_nonexistent() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());

        let data = storage.read_bytes("nope.txt").await.unwrap();
        assert!(data.is_none());
        assert!(storage.load_snapshots().await.unwrap().is_empty());
        assert!(storage.load_error_records().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_snapshot_save_load() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());
        let set = sample_set();

        storage.save_snapshots(&set).await.unwrap();
        let loaded = storage.load_snapshots().await.unwrap();

        assert_eq!(loaded, set);
        assert!(loaded["Krafttraining"].table(3).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_state_is_reported() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());

        storage.write_bytes(STATE_FILE, b"{ not json").await.unwrap();
        let err = storage.load_snapshots().await.unwrap_err();
        assert!(matches!(err, AppError::CorruptState { .. }));
    }

    #[tokio::test]
    async fn test_error_records_save_load() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());
        let at = Utc.with_ymd_and_hms(2025, 4, 1, 10, 0, 0).unwrap();
        let records = vec![ErrorRecord::new("fetch-error", at)];

        storage.save_error_records(&records).await.unwrap();
        let loaded = storage.load_error_records().await.unwrap();
        assert_eq!(loaded, records);
    }
}
