//! Diff calculation between two course snapshots.
//!
//! Produces one [`ChangeEvent`] per changed row, in table-index order and then
//! in the row order of the current snapshot. Rows that disappeared follow the
//! events of their table, in their former order.
//!
//! Rows are matched by key: the first configured key column present in the
//! row, or all columns except the table's status column when none is. The
//! status column never produces a field change either. When a table holds duplicate
//! keys on either side, that table falls back to matching by position.

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::models::{ChangeEvent, ChangeKind, CourseSnapshot, RowKey, RowSnapshot, TableSnapshot};

/// Calculator for computing diffs between course snapshots.
#[derive(Debug, Clone, Default)]
pub struct DiffCalculator {
    /// Columns that identify a row, in priority order
    key_columns: Vec<String>,
}

impl DiffCalculator {
    /// Create a new diff calculator.
    pub fn new(key_columns: Vec<String>) -> Self {
        Self { key_columns }
    }

    /// Calculate the changes of one course.
    ///
    /// Without a prior snapshot the course is being seen for the first time
    /// and nothing is reported.
    pub fn calculate(
        &self,
        course: &str,
        prior: Option<&CourseSnapshot>,
        current: &CourseSnapshot,
    ) -> Vec<ChangeEvent> {
        let Some(prior) = prior else {
            return Vec::new();
        };

        let mut events = Vec::new();
        for (&index, table) in &current.tables {
            let old_table = prior.table(index);
            let ctx = TableContext {
                course,
                index,
                label: &table.label,
                status_column: table
                    .status_column
                    .as_deref()
                    .or_else(|| old_table.and_then(|t| t.status_column.as_deref())),
            };
            match old_table {
                Some(old) => self.diff_table(&ctx, old, table, &mut events),
                None => self.all_added(&ctx, table, &mut events),
            }
        }
        events
    }

    /// Key of a row under this calculator's key columns.
    ///
    /// The fallback key skips `status_column`, so a row keeps its identity
    /// when only its booking cell changes.
    pub fn row_key(&self, row: &RowSnapshot, status_column: Option<&str>) -> String {
        for column in &self.key_columns {
            if let Some(value) = row.get(column).filter(|v| !v.is_empty()) {
                return format!("{column}={value}");
            }
        }
        row.fields
            .iter()
            .filter(|(k, _)| Some(k.as_str()) != status_column)
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("|")
    }

    /// Keys for every row, or None when they are not unique.
    fn unique_keys(
        &self,
        table: &TableSnapshot,
        status_column: Option<&str>,
    ) -> Option<Vec<String>> {
        let keys: Vec<String> = table
            .rows
            .iter()
            .map(|r| self.row_key(r, status_column))
            .collect();
        let unique = keys.iter().collect::<HashSet<_>>().len() == keys.len();
        unique.then_some(keys)
    }

    fn diff_table(
        &self,
        ctx: &TableContext<'_>,
        prior: &TableSnapshot,
        current: &TableSnapshot,
        events: &mut Vec<ChangeEvent>,
    ) {
        match (
            self.unique_keys(prior, ctx.status_column),
            self.unique_keys(current, ctx.status_column),
        ) {
            (Some(prior_keys), Some(current_keys)) => {
                let prior_map: HashMap<&str, &RowSnapshot> = prior_keys
                    .iter()
                    .map(String::as_str)
                    .zip(prior.rows.iter())
                    .collect();
                let current_set: HashSet<&str> = current_keys.iter().map(String::as_str).collect();

                for (key, row) in current_keys.iter().zip(current.rows.iter()) {
                    let row_key = RowKey::Key(key.clone());
                    match prior_map.get(key.as_str()) {
                        Some(old) => compare_rows(ctx, row_key, old, row, events),
                        None => events.push(ctx.added(row_key, row)),
                    }
                }
                for (key, row) in prior_keys.iter().zip(prior.rows.iter()) {
                    if !current_set.contains(key.as_str()) {
                        events.push(ctx.removed(RowKey::Key(key.clone()), row));
                    }
                }
            }
            _ => {
                log::debug!(
                    "{} / {}: row keys not unique, comparing by position",
                    ctx.course,
                    ctx.label
                );
                for (pos, row) in current.rows.iter().enumerate() {
                    match prior.rows.get(pos) {
                        Some(old) => compare_rows(ctx, RowKey::Position(pos), old, row, events),
                        None => events.push(ctx.added(RowKey::Position(pos), row)),
                    }
                }
                for (pos, row) in prior.rows.iter().enumerate().skip(current.rows.len()) {
                    events.push(ctx.removed(RowKey::Position(pos), row));
                }
            }
        }
    }

    fn all_added(&self, ctx: &TableContext<'_>, table: &TableSnapshot, events: &mut Vec<ChangeEvent>) {
        let keys = self.unique_keys(table, ctx.status_column);
        for (pos, row) in table.rows.iter().enumerate() {
            let row_key = match &keys {
                Some(keys) => RowKey::Key(keys[pos].clone()),
                None => RowKey::Position(pos),
            };
            events.push(ctx.added(row_key, row));
        }
    }
}

/// Convenience function to diff one course.
pub fn diff_course(
    course: &str,
    prior: Option<&CourseSnapshot>,
    current: &CourseSnapshot,
    key_columns: &[String],
) -> Vec<ChangeEvent> {
    DiffCalculator::new(key_columns.to_vec()).calculate(course, prior, current)
}

struct TableContext<'a> {
    course: &'a str,
    index: usize,
    label: &'a str,
    status_column: Option<&'a str>,
}

impl TableContext<'_> {
    fn event(
        &self,
        row_key: RowKey,
        kind: ChangeKind,
        old_value: Option<String>,
        new_value: Option<String>,
        row: &RowSnapshot,
    ) -> ChangeEvent {
        ChangeEvent {
            course: self.course.to_string(),
            table_index: self.index,
            table_label: self.label.to_string(),
            row_key,
            kind,
            old_value,
            new_value,
            row: row.clone(),
        }
    }

    fn added(&self, row_key: RowKey, row: &RowSnapshot) -> ChangeEvent {
        self.event(row_key, ChangeKind::Added, None, Some(row.status.clone()), row)
    }

    fn removed(&self, row_key: RowKey, row: &RowSnapshot) -> ChangeEvent {
        self.event(row_key, ChangeKind::Removed, Some(row.status.clone()), None, row)
    }
}

fn compare_rows(
    ctx: &TableContext<'_>,
    row_key: RowKey,
    old: &RowSnapshot,
    new: &RowSnapshot,
    events: &mut Vec<ChangeEvent>,
) {
    if old.status != new.status {
        events.push(ctx.event(
            row_key,
            ChangeKind::StatusChanged,
            Some(old.status.clone()),
            Some(new.status.clone()),
            new,
        ));
    } else if let Some((before, after)) = field_summary(old, new, ctx.status_column) {
        events.push(ctx.event(
            row_key,
            ChangeKind::FieldChanged,
            Some(before),
            Some(after),
            new,
        ));
    }
}

/// `column: value` lists of the non-status columns that differ, before and
/// after. None when only the status column differs.
fn field_summary(
    old: &RowSnapshot,
    new: &RowSnapshot,
    status_column: Option<&str>,
) -> Option<(String, String)> {
    let columns: BTreeSet<&String> = old
        .fields
        .keys()
        .chain(new.fields.keys())
        .filter(|c| Some(c.as_str()) != status_column)
        .collect();

    let mut before = Vec::new();
    let mut after = Vec::new();
    for column in columns {
        let a = old.fields.get(column);
        let b = new.fields.get(column);
        if a != b {
            before.push(format!("{column}: {}", a.map_or("-", String::as_str)));
            after.push(format!("{column}: {}", b.map_or("-", String::as_str)));
        }
    }
    (!before.is_empty()).then(|| (before.join(", "), after.join(", ")))
}
