//! Error notification cool-down.
//!
//! Remembers when a notification was last *sent* for each error category and
//! suppresses further ones until the category's cool-down has passed. Repeated
//! failures that were suppressed never move the window.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::models::Config;

/// Last sent notification for one error category.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorRecord {
    pub category: String,
    pub last_notified: DateTime<Utc>,
}

impl ErrorRecord {
    pub fn new(category: impl Into<String>, last_notified: DateTime<Utc>) -> Self {
        Self {
            category: category.into(),
            last_notified,
        }
    }
}

/// True once `cooldown` has fully passed since `last_notified`.
pub fn cooldown_elapsed(last_notified: DateTime<Utc>, now: DateTime<Utc>, cooldown: Duration) -> bool {
    now - last_notified >= cooldown
}

/// Cool-down durations per error category.
#[derive(Debug, Clone)]
pub struct CooldownPolicy {
    timeouts: HashMap<String, Duration>,
    default: Duration,
}

impl CooldownPolicy {
    pub fn new(default: Duration) -> Self {
        Self {
            timeouts: HashMap::new(),
            default,
        }
    }

    pub fn with_timeout(mut self, category: impl Into<String>, cooldown: Duration) -> Self {
        self.timeouts.insert(category.into(), cooldown);
        self
    }

    pub fn from_config(config: &Config) -> Self {
        let mut policy = Self::new(secs(config.default_error_timeout_secs));
        for (category, timeout) in &config.error_timeouts {
            policy.timeouts.insert(category.clone(), secs(*timeout));
        }
        policy
    }

    pub fn cooldown_for(&self, category: &str) -> Duration {
        self.timeouts.get(category).copied().unwrap_or(self.default)
    }
}

/// Seconds from config; values beyond chrono's range saturate.
fn secs(value: u64) -> Duration {
    i64::try_from(value)
        .ok()
        .and_then(Duration::try_seconds)
        .unwrap_or(Duration::MAX)
}

/// In-memory set of error records, at most one per category.
#[derive(Debug, Clone, Default)]
pub struct ErrorTracker {
    records: BTreeMap<String, DateTime<Utc>>,
}

impl ErrorTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from persisted records; the latest timestamp wins on duplicates.
    pub fn from_records(records: impl IntoIterator<Item = ErrorRecord>) -> Self {
        let mut tracker = Self::new();
        for record in records {
            let entry = tracker
                .records
                .entry(record.category)
                .or_insert(record.last_notified);
            if record.last_notified > *entry {
                *entry = record.last_notified;
            }
        }
        tracker
    }

    /// Whether a notification for `category` may be sent at `now`.
    pub fn should_notify(&self, category: &str, now: DateTime<Utc>, cooldown: Duration) -> bool {
        match self.records.get(category) {
            Some(last) => cooldown_elapsed(*last, now, cooldown),
            None => true,
        }
    }

    /// Remember that a notification for `category` was dispatched at `now`.
    pub fn record_notified(&mut self, category: &str, now: DateTime<Utc>) {
        self.records.insert(category.to_string(), now);
    }

    pub fn last_notified(&self, category: &str) -> Option<DateTime<Utc>> {
        self.records.get(category).copied()
    }

    pub fn records(&self) -> Vec<ErrorRecord> {
        self.records
            .iter()
            .map(|(category, at)| ErrorRecord::new(category.clone(), *at))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
