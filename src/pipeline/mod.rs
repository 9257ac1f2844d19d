//! Watcher pipeline.
//!
//! - `diff`: compare two snapshots of a course into change events
//! - `filter`: keep the events worth a notification
//! - `cooldown`: rate-limit error notifications per category
//! - `report`: render notifications
//! - `cycle`: the polling loop tying it together

mod cooldown;
mod cycle;
mod diff;
mod filter;
mod report;

pub use cooldown::{CooldownPolicy, ErrorRecord, ErrorTracker, cooldown_elapsed};
pub use cycle::{CycleReport, Watcher};
pub use diff::{DiffCalculator, diff_course};
pub use filter::{NotificationFilter, filter_events};
pub use report::{render_changes, render_error};
