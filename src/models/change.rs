//! Change events produced by comparing two snapshots.

use std::fmt;

use serde::Serialize;

use super::RowSnapshot;

/// How a row is identified across snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum RowKey {
    /// Stable key built from the row's key columns
    Key(String),
    /// Row position, used when keys are not unique in a table
    Position(usize),
}

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowKey::Key(key) => f.write_str(key),
            RowKey::Position(pos) => write!(f, "#{}", pos + 1),
        }
    }
}

/// What happened to a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ChangeKind {
    Added,
    Removed,
    StatusChanged,
    FieldChanged,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Added => "added",
            ChangeKind::Removed => "removed",
            ChangeKind::StatusChanged => "status-changed",
            ChangeKind::FieldChanged => "field-changed",
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single semantic change in one row of one course table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeEvent {
    pub course: String,
    pub table_index: usize,
    pub table_label: String,
    pub row_key: RowKey,
    pub kind: ChangeKind,
    /// Status before (status/removed) or differing fields before (field change)
    pub old_value: Option<String>,
    /// Status after (status/added) or differing fields after (field change)
    pub new_value: Option<String>,
    /// Current row, or the former row for removals
    pub row: RowSnapshot,
}

impl ChangeEvent {
    /// The status a filter should look at for this event.
    ///
    /// Removed rows are judged by what they were, everything else by what
    /// they are now.
    pub fn relevant_status(&self) -> Option<&str> {
        match self.kind {
            ChangeKind::Removed => self.old_value.as_deref(),
            ChangeKind::FieldChanged => Some(self.row.status.as_str()),
            ChangeKind::Added | ChangeKind::StatusChanged => self.new_value.as_deref(),
        }
    }

    /// One-line `old → new` description.
    pub fn transition(&self) -> String {
        format!(
            "{} → {}",
            self.old_value.as_deref().unwrap_or("-"),
            self.new_value.as_deref().unwrap_or("-")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(kind: ChangeKind, old: Option<&str>, new: Option<&str>) -> ChangeEvent {
        ChangeEvent {
            course: "Krafttraining".into(),
            table_index: 0,
            table_label: "Studio".into(),
            row_key: RowKey::Key("Nr.=1".into()),
            kind,
            old_value: old.map(String::from),
            new_value: new.map(String::from),
            row: RowSnapshot::from_pairs([("Nr.", "1")], "buchen"),
        }
    }

    #[test]
    fn test_relevant_status() {
        assert_eq!(
            event(ChangeKind::Removed, Some("buchen"), None).relevant_status(),
            Some("buchen")
        );
        assert_eq!(
            event(ChangeKind::StatusChanged, Some("Warteliste"), Some("buchen"))
                .relevant_status(),
            Some("buchen")
        );
    }

    #[test]
    fn test_transition_and_key_display() {
        let e = event(ChangeKind::Added, None, Some("buchen"));
        assert_eq!(e.transition(), "- → buchen");
        assert_eq!(RowKey::Position(0).to_string(), "#1");
        assert_eq!(e.kind.to_string(), "added");
    }
}
