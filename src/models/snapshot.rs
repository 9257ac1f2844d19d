//! Captured course tables.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Latest snapshot per course name.
pub type SnapshotSet = BTreeMap<String, CourseSnapshot>;

/// One data row of a course table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RowSnapshot {
    /// Column header to cell text
    pub fields: BTreeMap<String, String>,

    /// Booking status derived from the row's action cell
    pub status: String,
}

impl RowSnapshot {
    pub fn new(fields: BTreeMap<String, String>, status: impl Into<String>) -> Self {
        Self {
            fields,
            status: status.into(),
        }
    }

    /// Build a row from `(column, value)` pairs.
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>, status: &str) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        let fields = pairs
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self::new(fields, status)
    }

    pub fn get(&self, column: &str) -> Option<&str> {
        self.fields.get(column).map(String::as_str)
    }
}

/// Rows of one configured table, in page order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TableSnapshot {
    /// Label from the table configuration
    pub label: String,

    /// When the page was fetched
    pub captured_at: DateTime<Utc>,

    #[serde(default)]
    pub rows: Vec<RowSnapshot>,

    /// Column the row status was derived from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_column: Option<String>,
}

impl TableSnapshot {
    pub fn new(label: impl Into<String>, captured_at: DateTime<Utc>, rows: Vec<RowSnapshot>) -> Self {
        Self {
            label: label.into(),
            captured_at,
            rows,
            status_column: None,
        }
    }

    pub fn with_status_column(mut self, column: impl Into<String>) -> Self {
        self.status_column = Some(column.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// All configured tables of a course page at one point in time.
///
/// This is the unit that gets persisted and compared.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CourseSnapshot {
    pub captured_at: DateTime<Utc>,

    /// Table index on the page to its rows
    #[serde(default)]
    pub tables: BTreeMap<usize, TableSnapshot>,
}

impl CourseSnapshot {
    pub fn new(captured_at: DateTime<Utc>) -> Self {
        Self {
            captured_at,
            tables: BTreeMap::new(),
        }
    }

    /// Add a table, builder style.
    pub fn with_table(mut self, index: usize, table: TableSnapshot) -> Self {
        self.tables.insert(index, table);
        self
    }

    pub fn table(&self, index: usize) -> Option<&TableSnapshot> {
        self.tables.get(&index)
    }

    /// Total number of rows across all tables.
    pub fn row_count(&self) -> usize {
        self.tables.values().map(|t| t.rows.len()).sum()
    }
}
