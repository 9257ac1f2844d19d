// src/pipeline/cycle.rs

//! Polling loop.
//!
//! The [`Watcher`] owns all mutable state: the latest snapshot per course and
//! the error cool-down records. Each cycle checks every configured course in
//! order, sends at most one change report, then persists the snapshots.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::{AppError, Result};
use crate::models::{ChangeEvent, Config, CourseConfig, SnapshotSet};
use crate::services::{Notifier, SnapshotSource};
use crate::storage::StateStore;
use crate::utils::Clock;

use super::{CooldownPolicy, DiffCalculator, ErrorTracker, NotificationFilter, render_changes, render_error};

/// Outcome of one polling cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub courses_ok: usize,
    pub courses_failed: usize,
    /// Changes detected, before filtering
    pub events_found: usize,
    /// Changes included in the change report
    pub events_notified: usize,
    pub notifications_sent: usize,
    /// Error reports held back by the cool-down
    pub notifications_suppressed: usize,
    /// Whether the snapshot set was written this cycle
    pub saved: bool,
}

impl fmt::Display for CycleReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Cycle finished: {} ok, {} failed, {} changes ({} notified), {} sent, {} suppressed{}",
            self.courses_ok,
            self.courses_failed,
            self.events_found,
            self.events_notified,
            self.notifications_sent,
            self.notifications_suppressed,
            if self.saved { ", state saved" } else { "" }
        )
    }
}

/// Course availability watcher.
pub struct Watcher {
    config: Config,
    config_path: Option<PathBuf>,
    source: Box<dyn SnapshotSource>,
    notifier: Box<dyn Notifier>,
    store: Box<dyn StateStore>,
    clock: Box<dyn Clock>,
    snapshots: SnapshotSet,
    /// Snapshots changed since the last successful save
    dirty: bool,
    errors: ErrorTracker,
    cooldown: CooldownPolicy,
    filter: NotificationFilter,
    diff: DiffCalculator,
}

impl Watcher {
    /// Create a watcher and load its persisted state.
    ///
    /// Unreadable state files are treated as a cold start. Other storage
    /// errors are returned.
    pub async fn new(
        config: Config,
        source: Box<dyn SnapshotSource>,
        notifier: Box<dyn Notifier>,
        store: Box<dyn StateStore>,
        clock: Box<dyn Clock>,
    ) -> Result<Self> {
        let snapshots = match store.load_snapshots().await {
            Ok(snapshots) => snapshots,
            Err(e @ AppError::CorruptState { .. }) => {
                log::warn!("{e}; starting without prior snapshots");
                SnapshotSet::new()
            }
            Err(e) => return Err(e),
        };
        let errors = match store.load_error_records().await {
            Ok(records) => ErrorTracker::from_records(records),
            Err(e @ AppError::CorruptState { .. }) => {
                log::warn!("{e}; starting without error records");
                ErrorTracker::new()
            }
            Err(e) => return Err(e),
        };
        log::info!(
            "Loaded {} course snapshot(s), {} error record(s)",
            snapshots.len(),
            errors.records().len()
        );

        Ok(Self {
            cooldown: CooldownPolicy::from_config(&config),
            filter: NotificationFilter::from_config(&config),
            diff: DiffCalculator::new(config.parser.key_columns.clone()),
            config,
            config_path: None,
            source,
            notifier,
            store,
            clock,
            snapshots,
            dirty: false,
            errors,
        })
    }

    /// Re-read this file before every cycle after the first.
    pub fn with_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn snapshots(&self) -> &SnapshotSet {
        &self.snapshots
    }

    pub fn error_tracker(&self) -> &ErrorTracker {
        &self.errors
    }

    /// Replace the configuration used from the next cycle on.
    ///
    /// Fetch and parse settings are bound to the snapshot source and are not
    /// affected.
    pub fn set_config(&mut self, config: Config) {
        self.cooldown = CooldownPolicy::from_config(&config);
        self.filter = NotificationFilter::from_config(&config);
        self.diff = DiffCalculator::new(config.parser.key_columns.clone());
        self.config = config;
    }

    fn reload_config(&mut self) {
        let Some(path) = &self.config_path else {
            return;
        };
        match Config::load(path).and_then(|c| c.validate().map(|()| c)) {
            Ok(config) => {
                log::debug!("Reloaded config from {}", path.display());
                self.set_config(config);
            }
            Err(e) => log::warn!(
                "Config reload from {} failed, keeping previous config: {e}",
                path.display()
            ),
        }
    }

    /// Run cycles until `cancel` fires.
    pub async fn run(&mut self, cancel: CancellationToken) {
        loop {
            let report = self.run_cycle(&cancel).await;
            log::info!("{report}");

            if cancel.is_cancelled() {
                break;
            }
            let interval = Duration::from_secs(self.config.interval_secs);
            log::debug!("Sleeping {}s", interval.as_secs());
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
            self.reload_config();
        }
        log::info!("Watcher stopped");
    }

    /// Check every course once, notify and persist.
    ///
    /// Cancellation is honoured between courses; the cycle still sends its
    /// report and saves what it collected.
    pub async fn run_cycle(&mut self, cancel: &CancellationToken) -> CycleReport {
        let mut report = CycleReport::default();
        let mut events: Vec<ChangeEvent> = Vec::new();
        let courses = self.config.courses.clone();

        for course in &courses {
            if cancel.is_cancelled() {
                log::info!("Shutdown requested, skipping remaining courses");
                break;
            }

            match self.source.snapshot(course).await {
                Ok(current) => {
                    report.courses_ok += 1;
                    let found =
                        self.diff
                            .calculate(&course.name, self.snapshots.get(&course.name), &current);
                    for event in &found {
                        log::debug!(
                            "{} / {} / {}: {} {}",
                            event.course,
                            event.table_label,
                            event.row_key,
                            event.kind,
                            event.transition()
                        );
                    }
                    report.events_found += found.len();
                    events.extend(found);
                    self.snapshots.insert(course.name.clone(), current);
                    self.dirty = true;
                }
                Err(e) => {
                    report.courses_failed += 1;
                    self.handle_failure(course, &e, &mut report).await;
                }
            }
        }

        let batch = self.filter.batch(&events);
        report.events_notified = batch.len();
        if !batch.is_empty() {
            let message = render_changes(&batch, &self.config.courses);
            match self.notifier.send(&message).await {
                Ok(()) => report.notifications_sent += 1,
                Err(e) => log::error!("Failed to send change report: {e}"),
            }
        }

        if self.dirty {
            match self.store.save_snapshots(&self.snapshots).await {
                Ok(()) => {
                    self.dirty = false;
                    report.saved = true;
                }
                Err(e) => log::error!("Failed to save snapshots, retrying next cycle: {e}"),
            }
        }

        report
    }

    async fn handle_failure(&mut self, course: &CourseConfig, err: &AppError, report: &mut CycleReport) {
        let category = self.config.category_for(err.failure_kind()).to_string();
        log::warn!("{} [{category}]: {err}", course.name);

        let now = self.clock.now();
        let cooldown = self.cooldown.cooldown_for(&category);
        if !self.errors.should_notify(&category, now, cooldown) {
            log::debug!("{category} notification suppressed by cool-down");
            report.notifications_suppressed += 1;
            return;
        }

        let message = render_error(&category, course, &err.to_string(), now);
        if let Err(e) = self.notifier.send(&message).await {
            log::error!("Failed to send {category} report: {e}");
            return;
        }
        report.notifications_sent += 1;
        self.errors.record_notified(&category, now);
        if let Err(e) = self.store.save_error_records(&self.errors.records()).await {
            log::error!("Failed to save error records: {e}");
        }
    }
}
