//! Decides which change events are worth a notification.
//!
//! Only transitions *into* an interesting status matter. Added and removed
//! rows count when the row's status is interesting; other column changes are
//! ignored unless explicitly enabled.

use std::collections::HashSet;

use crate::models::{ChangeEvent, ChangeKind, Config};

/// Filter over change events, keyed on interesting status values.
#[derive(Debug, Clone)]
pub struct NotificationFilter {
    interesting: HashSet<String>,
    include_field_changes: bool,
}

impl NotificationFilter {
    pub fn new(interesting: HashSet<String>) -> Self {
        Self {
            interesting,
            include_field_changes: false,
        }
    }

    /// Also pass field changes of rows whose status is interesting.
    pub fn with_field_changes(mut self, enabled: bool) -> Self {
        self.include_field_changes = enabled;
        self
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.interesting_set()).with_field_changes(config.notify_field_changes)
    }

    pub fn is_interesting(&self, event: &ChangeEvent) -> bool {
        let status_matches = event
            .relevant_status()
            .is_some_and(|s| self.interesting.contains(s));
        match event.kind {
            ChangeKind::FieldChanged => self.include_field_changes && status_matches,
            ChangeKind::Added | ChangeKind::Removed | ChangeKind::StatusChanged => status_matches,
        }
    }

    /// Keep interesting events, preserving order.
    pub fn filter(&self, events: &[ChangeEvent]) -> Vec<ChangeEvent> {
        events
            .iter()
            .filter(|e| self.is_interesting(e))
            .cloned()
            .collect()
    }

    /// Filter and drop exact duplicates, so each change is sent once.
    pub fn batch(&self, events: &[ChangeEvent]) -> Vec<ChangeEvent> {
        let mut batch: Vec<ChangeEvent> = Vec::new();
        for event in self.filter(events) {
            if !batch.contains(&event) {
                batch.push(event);
            }
        }
        batch
    }
}

/// Convenience function: keep events that lead into an interesting status.
pub fn filter_events(events: &[ChangeEvent], interesting: &HashSet<String>) -> Vec<ChangeEvent> {
    NotificationFilter::new(interesting.clone()).filter(events)
}
