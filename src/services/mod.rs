//! Service layer for the watcher.
//!
//! - Course page scraping (`CourseScraper`)
//! - Notification delivery (`SmtpNotifier`, `LogNotifier`)

mod courses;
mod mailer;

pub use courses::{CourseScraper, SnapshotSource, parse_course};
pub use mailer::{LogNotifier, Message, Notifier, SmtpConfig, SmtpNotifier};
