//! Notification rendering.
//!
//! Change reports group events by course and then by table, keeping the order
//! in which the diff produced them.

use std::fmt::Write;

use chrono::{DateTime, Utc};

use crate::models::{ChangeEvent, ChangeKind, CourseConfig, RowSnapshot};
use crate::services::Message;

/// Columns shown first when describing a row.
const PRIORITY_COLUMNS: &[&str] = &[
    "KursnrNo.",
    "TagDay",
    "ZeitTime",
    "OrtLocation",
    "LeitungGuidance",
    "PreisCost",
];

fn heading(kind: ChangeKind) -> &'static str {
    match kind {
        ChangeKind::Added => "New course",
        ChangeKind::Removed => "Removed",
        ChangeKind::StatusChanged => "Status change",
        ChangeKind::FieldChanged => "Details changed",
    }
}

/// Render one message covering all events of a cycle.
pub fn render_changes(events: &[ChangeEvent], courses: &[CourseConfig]) -> Message {
    let groups = group_events(events);
    let names: Vec<&str> = groups.iter().map(|(course, _)| *course).collect();
    let subject = format!(
        "Course update: {} change{} ({})",
        events.len(),
        if events.len() == 1 { "" } else { "s" },
        names.join(", ")
    );

    let mut text = String::new();
    let mut html = String::new();
    for (course, tables) in &groups {
        let url = courses
            .iter()
            .find(|c| c.name == *course)
            .map(|c| c.url.as_str());

        let _ = writeln!(text, "{course}");
        let _ = write!(html, "<h1>{}</h1>", escape(course));
        if let Some(url) = url {
            let _ = writeln!(text, "{url}");
            let _ = write!(html, "<p><a href='{0}'>{0}</a></p>", escape(url));
        }
        text.push('\n');

        for (label, items) in tables {
            let _ = writeln!(text, "{label}");
            let _ = write!(html, "<h2>{}</h2>", escape(label));
            for event in items {
                render_event_text(&mut text, event);
                render_event_html(&mut html, event);
            }
            text.push('\n');
        }
    }

    Message::new(subject, text.trim_end().to_string() + "\n", html)
}

/// Render an error report for a failed course check.
pub fn render_error(
    category: &str,
    course: &CourseConfig,
    detail: &str,
    at: DateTime<Utc>,
) -> Message {
    let subject = format!("{category}: {}", course.name);
    let time = at.to_rfc3339();
    let text = format!(
        "Error while checking {} ({}):\n\n{detail}\n\nTime: {time}\n",
        course.name, course.url
    );
    let html = format!(
        "<h1>Error while checking {0}</h1><p><a href='{1}'>{1}</a></p><p>{2}</p><p>Time: {time}</p>",
        escape(&course.name),
        escape(&course.url),
        escape(detail)
    );
    Message::new(subject, text, html)
}

type TableGroup<'a> = (&'a str, Vec<&'a ChangeEvent>);

/// Group by course, then table label, in first-seen order.
fn group_events(events: &[ChangeEvent]) -> Vec<(&str, Vec<TableGroup<'_>>)> {
    let mut groups: Vec<(&str, Vec<TableGroup<'_>>)> = Vec::new();
    for event in events {
        let pos = match groups.iter().position(|(c, _)| *c == event.course) {
            Some(pos) => pos,
            None => {
                groups.push((event.course.as_str(), Vec::new()));
                groups.len() - 1
            }
        };
        let tables = &mut groups[pos].1;
        match tables.iter_mut().find(|(label, _)| *label == event.table_label) {
            Some((_, items)) => items.push(event),
            None => tables.push((event.table_label.as_str(), vec![event])),
        }
    }
    groups
}

fn render_event_text(out: &mut String, event: &ChangeEvent) {
    let _ = writeln!(out, "[{}] {}", heading(event.kind), event.row_key);
    match event.kind {
        ChangeKind::StatusChanged | ChangeKind::FieldChanged => {
            let _ = writeln!(out, "  Change: {}", event.transition());
        }
        ChangeKind::Added | ChangeKind::Removed => {
            let _ = writeln!(out, "  Status: {}", event.row.status);
        }
    }
    for (column, value) in ordered_fields(&event.row) {
        let _ = writeln!(out, "  {column}: {value}");
    }
}

fn render_event_html(out: &mut String, event: &ChangeEvent) {
    let _ = write!(
        out,
        "<h3>{} <small>{}</small></h3><p>",
        heading(event.kind),
        escape(&event.row_key.to_string())
    );
    match event.kind {
        ChangeKind::StatusChanged | ChangeKind::FieldChanged => {
            let _ = write!(out, "<b>{}</b><br>", escape(&event.transition()));
        }
        ChangeKind::Added | ChangeKind::Removed => {
            let _ = write!(out, "Status: <b>{}</b><br>", escape(&event.row.status));
        }
    }
    for (column, value) in ordered_fields(&event.row) {
        let _ = write!(out, "{}: {}<br>", escape(column), escape(value));
    }
    out.push_str("</p>");
}

/// Priority columns first, the rest in name order; empty cells are skipped.
fn ordered_fields(row: &RowSnapshot) -> Vec<(&str, &str)> {
    let mut fields: Vec<(&str, &str)> = PRIORITY_COLUMNS
        .iter()
        .filter_map(|c| row.get(c).map(|v| (*c, v)))
        .collect();
    fields.extend(
        row.fields
            .iter()
            .filter(|(k, _)| !PRIORITY_COLUMNS.contains(&k.as_str()))
            .map(|(k, v)| (k.as_str(), v.as_str())),
    );
    fields.retain(|(_, v)| !v.is_empty());
    fields
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}
