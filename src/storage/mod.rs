//! Storage abstractions for watcher state.
//!
//! Two documents are kept, each replaced atomically on save:
//!
//! ```text
//! storage/
//! ├── state.json    # latest snapshot per course
//! └── errors.json   # last notification time per error category
//! ```

pub mod local;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::SnapshotSet;
use crate::pipeline::ErrorRecord;

// Re-export for convenience
pub use local::LocalStorage;

/// On-disk form of the snapshot set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateData {
    /// ISO 8601 timestamp of last save
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub courses: SnapshotSet,
}

impl StateData {
    pub fn new(courses: SnapshotSet) -> Self {
        Self {
            updated_at: Utc::now(),
            courses,
        }
    }
}

/// On-disk form of the error cool-down records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorData {
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub records: Vec<ErrorRecord>,
}

impl ErrorData {
    pub fn new(records: Vec<ErrorRecord>) -> Self {
        Self {
            updated_at: Utc::now(),
            records,
        }
    }
}

/// Trait for state storage backends.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Load the last saved snapshot per course.
    ///
    /// A store that was never written yields an empty set. Unreadable content
    /// yields `AppError::CorruptState`.
    async fn load_snapshots(&self) -> Result<SnapshotSet>;

    /// Replace the saved snapshot set.
    async fn save_snapshots(&self, snapshots: &SnapshotSet) -> Result<()>;

    /// Load error cool-down records.
    async fn load_error_records(&self) -> Result<Vec<ErrorRecord>>;

    /// Replace the saved error cool-down records.
    async fn save_error_records(&self, records: &[ErrorRecord]) -> Result<()>;
}
