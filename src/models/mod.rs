// src/models/mod.rs

//! Domain models for the watcher.
//!
//! Configuration, captured snapshots and the change events derived from them.

mod change;
mod config;
mod snapshot;

// Re-export all public types
pub use change::{ChangeEvent, ChangeKind, RowKey};
pub use config::{
    Config, CourseConfig, CrawlerConfig, ErrorCategories, LoggingConfig, ParserConfig,
    StatusRule, TableConfig,
};
pub use snapshot::{CourseSnapshot, RowSnapshot, SnapshotSet, TableSnapshot};
