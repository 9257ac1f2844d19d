//! Polling cycle tests against in-memory collaborators and on-disk storage.

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use course_watch::error::{AppError, Result};
use course_watch::models::{
    Config, CourseConfig, CourseSnapshot, RowSnapshot, SnapshotSet, TableConfig, TableSnapshot,
};
use course_watch::pipeline::{ErrorRecord, Watcher};
use course_watch::services::{Message, Notifier, SnapshotSource};
use course_watch::storage::{LocalStorage, StateStore};
use course_watch::utils::Clock;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
enum Page {
    Ok(CourseSnapshot),
    FetchFails,
    ParseFails,
}

#[derive(Clone, Default)]
struct FakeSource {
    pages: Arc<Mutex<HashMap<String, Page>>>,
}

impl FakeSource {
    fn set(&self, course: &str, page: Page) {
        self.pages.lock().unwrap().insert(course.to_string(), page);
    }
}

#[async_trait]
impl SnapshotSource for FakeSource {
    async fn snapshot(&self, course: &CourseConfig) -> Result<CourseSnapshot> {
        let page = self.pages.lock().unwrap().get(&course.name).cloned();
        match page {
            Some(Page::Ok(snapshot)) => Ok(snapshot),
            Some(Page::ParseFails) => Err(AppError::parse(&course.name, "table 1 not found")),
            Some(Page::FetchFails) | None => Err(AppError::fetch(&course.name, "connection refused")),
        }
    }
}

#[derive(Clone, Default)]
struct FakeNotifier {
    sent: Arc<Mutex<Vec<Message>>>,
    failing: Arc<AtomicBool>,
}

impl FakeNotifier {
    fn sent(&self) -> Vec<Message> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for FakeNotifier {
    async fn send(&self, message: &Message) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(AppError::notify("smtp unavailable"));
        }
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }
}

#[derive(Clone)]
struct FakeClock(Arc<Mutex<DateTime<Utc>>>);

impl FakeClock {
    fn new() -> Self {
        Self(Arc::new(Mutex::new(
            Utc.with_ymd_and_hms(2025, 4, 1, 8, 0, 0).unwrap(),
        )))
    }

    fn advance(&self, by: Duration) {
        *self.0.lock().unwrap() += by;
    }
}

impl Clock for FakeClock {
    fn now(&self) -> DateTime<Utc> {
        *self.0.lock().unwrap()
    }
}

/// Local storage whose next `failing_saves` snapshot saves fail.
#[derive(Clone)]
struct FlakyStore {
    inner: LocalStorage,
    failing_saves: Arc<AtomicUsize>,
}

#[async_trait]
impl StateStore for FlakyStore {
    async fn load_snapshots(&self) -> Result<SnapshotSet> {
        self.inner.load_snapshots().await
    }

    async fn save_snapshots(&self, snapshots: &SnapshotSet) -> Result<()> {
        let fail = self
            .failing_saves
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if fail {
            return Err(AppError::Io(io::Error::other("disk full")));
        }
        self.inner.save_snapshots(snapshots).await
    }

    async fn load_error_records(&self) -> Result<Vec<ErrorRecord>> {
        self.inner.load_error_records().await
    }

    async fn save_error_records(&self, records: &[ErrorRecord]) -> Result<()> {
        self.inner.save_error_records(records).await
    }
}

struct Harness {
    _tmp: TempDir,
    storage: LocalStorage,
    source: FakeSource,
    notifier: FakeNotifier,
    clock: FakeClock,
}

impl Harness {
    fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        Self {
            storage: LocalStorage::new(tmp.path()),
            _tmp: tmp,
            source: FakeSource::default(),
            notifier: FakeNotifier::default(),
            clock: FakeClock::new(),
        }
    }

    async fn watcher(&self, config: Config) -> Watcher {
        self.watcher_with_store(config, Box::new(LocalStorage::new(self.storage.root_dir())))
            .await
    }

    async fn watcher_with_store(&self, config: Config, store: Box<dyn StateStore>) -> Watcher {
        Watcher::new(
            config,
            Box::new(self.source.clone()),
            Box::new(self.notifier.clone()),
            store,
            Box::new(self.clock.clone()),
        )
        .await
        .unwrap()
    }

    async fn seed(&self, snapshots: SnapshotSet) {
        self.storage.save_snapshots(&snapshots).await.unwrap();
    }
}

fn config() -> Config {
    let mut config = Config {
        interesting_status: vec!["buchbar".into()],
        courses: vec![course("Krafttraining")],
        ..Config::default()
    };
    config.error_categories.fetch = "Scraping-Fehler".into();
    config.error_timeouts.insert("Scraping-Fehler".into(), 3600);
    config
}

fn course(name: &str) -> CourseConfig {
    CourseConfig::new(
        name,
        format!("https://example.com/{}.html", name.to_lowercase()),
        vec![TableConfig::new(1, "Studio")],
    )
}

fn row(nr: &str, status: &str) -> RowSnapshot {
    RowSnapshot::from_pairs([("Nr.", nr), ("TagDay", "Mo"), ("ZeitTime", "10:00")], status)
}

fn snapshot(tables: Vec<(usize, Vec<RowSnapshot>)>) -> CourseSnapshot {
    let at = Utc.with_ymd_and_hms(2025, 4, 1, 7, 0, 0).unwrap();
    tables
        .into_iter()
        .fold(CourseSnapshot::new(at), |snap, (index, rows)| {
            snap.with_table(index, TableSnapshot::new(format!("Table {index}"), at, rows))
        })
}

fn set(entries: Vec<(&str, CourseSnapshot)>) -> SnapshotSet {
    entries
        .into_iter()
        .map(|(name, snap)| (name.to_string(), snap))
        .collect()
}

#[tokio::test]
async fn test_status_change_notifies_and_persists() {
    let h = Harness::new();
    h.seed(set(vec![(
        "Krafttraining",
        snapshot(vec![(1, vec![row("1001", "ausgebucht")])]),
    )]))
    .await;
    let current = snapshot(vec![(1, vec![row("1001", "buchbar")])]);
    h.source.set("Krafttraining", Page::Ok(current.clone()));

    let mut watcher = h.watcher(config()).await;
    let report = watcher.run_cycle(&CancellationToken::new()).await;

    assert_eq!(report.events_found, 1);
    assert_eq!(report.events_notified, 1);
    assert_eq!(report.notifications_sent, 1);
    assert!(report.saved);

    let sent = h.notifier.sent();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].text.contains("ausgebucht → buchbar"));

    let stored = h.storage.load_snapshots().await.unwrap();
    assert_eq!(stored.get("Krafttraining"), Some(&current));
}

#[tokio::test]
async fn test_unchanged_page_sends_nothing() {
    let h = Harness::new();
    let snap = snapshot(vec![(1, vec![row("1001", "buchbar")])]);
    h.seed(set(vec![("Krafttraining", snap.clone())])).await;
    h.source.set("Krafttraining", Page::Ok(snap));

    let mut watcher = h.watcher(config()).await;
    let report = watcher.run_cycle(&CancellationToken::new()).await;

    assert_eq!(report.events_found, 0);
    assert!(h.notifier.sent().is_empty());
}

#[tokio::test]
async fn test_fetch_errors_respect_cooldown() {
    let h = Harness::new();
    let prior = snapshot(vec![(1, vec![row("1001", "ausgebucht")])]);
    h.seed(set(vec![("Krafttraining", prior.clone())])).await;
    h.source.set("Krafttraining", Page::FetchFails);

    let mut watcher = h.watcher(config()).await;
    let cancel = CancellationToken::new();

    let first = watcher.run_cycle(&cancel).await;
    assert_eq!(first.courses_failed, 1);
    assert_eq!(first.notifications_sent, 1);

    h.clock.advance(Duration::seconds(10));
    let second = watcher.run_cycle(&cancel).await;
    assert_eq!(second.notifications_sent, 0);
    assert_eq!(second.notifications_suppressed, 1);

    let sent = h.notifier.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].subject, "Scraping-Fehler: Krafttraining");

    assert_eq!(watcher.snapshots().get("Krafttraining"), Some(&prior));
    let stored = h.storage.load_snapshots().await.unwrap();
    assert_eq!(stored.get("Krafttraining"), Some(&prior));

    let records = h.storage.load_error_records().await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].category, "Scraping-Fehler");
}

#[tokio::test]
async fn test_error_notifies_again_once_cooldown_elapsed() {
    let h = Harness::new();
    h.source.set("Krafttraining", Page::FetchFails);
    let mut watcher = h.watcher(config()).await;
    let cancel = CancellationToken::new();

    watcher.run_cycle(&cancel).await;
    h.clock.advance(Duration::seconds(3599));
    watcher.run_cycle(&cancel).await;
    assert_eq!(h.notifier.sent().len(), 1);

    h.clock.advance(Duration::seconds(1));
    watcher.run_cycle(&cancel).await;
    assert_eq!(h.notifier.sent().len(), 2);
}

#[tokio::test]
async fn test_cooldown_survives_restart() {
    let h = Harness::new();
    h.source.set("Krafttraining", Page::FetchFails);
    let cancel = CancellationToken::new();

    let mut watcher = h.watcher(config()).await;
    watcher.run_cycle(&cancel).await;
    drop(watcher);

    h.clock.advance(Duration::seconds(60));
    let mut restarted = h.watcher(config()).await;
    let report = restarted.run_cycle(&cancel).await;

    assert_eq!(report.notifications_suppressed, 1);
    assert_eq!(h.notifier.sent().len(), 1);
}

#[tokio::test]
async fn test_failed_send_does_not_start_cooldown() {
    let h = Harness::new();
    h.source.set("Krafttraining", Page::FetchFails);
    h.notifier.failing.store(true, Ordering::SeqCst);

    let mut watcher = h.watcher(config()).await;
    let cancel = CancellationToken::new();
    watcher.run_cycle(&cancel).await;
    assert!(watcher.error_tracker().is_empty());

    h.notifier.failing.store(false, Ordering::SeqCst);
    h.clock.advance(Duration::seconds(10));
    let report = watcher.run_cycle(&cancel).await;
    assert_eq!(report.notifications_sent, 1);
}

#[tokio::test]
async fn test_cold_start_is_silent() {
    let h = Harness::new();
    h.source.set(
        "Krafttraining",
        Page::Ok(snapshot(vec![(1, vec![row("1001", "buchbar")])])),
    );

    let mut watcher = h.watcher(config()).await;
    let report = watcher.run_cycle(&CancellationToken::new()).await;

    assert_eq!(report.events_found, 0);
    assert!(report.saved);
    assert!(h.notifier.sent().is_empty());
    assert!(h.storage.load_snapshots().await.unwrap().contains_key("Krafttraining"));
}

#[tokio::test]
async fn test_corrupt_state_starts_cold() {
    let h = Harness::new();
    std::fs::write(h.storage.path("state.json"), b"{ not json").unwrap();
    h.source.set(
        "Krafttraining",
        Page::Ok(snapshot(vec![(1, vec![row("1001", "buchbar")])])),
    );

    let mut watcher = h.watcher(config()).await;
    assert!(watcher.snapshots().is_empty());

    let report = watcher.run_cycle(&CancellationToken::new()).await;
    assert_eq!(report.events_found, 0);
    assert!(report.saved);
    assert!(h.notifier.sent().is_empty());
    assert_eq!(h.storage.load_snapshots().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_new_table_reports_interesting_rows_only() {
    let h = Harness::new();
    h.seed(set(vec![(
        "Krafttraining",
        snapshot(vec![(1, vec![row("1001", "ausgebucht")])]),
    )]))
    .await;
    h.source.set(
        "Krafttraining",
        Page::Ok(snapshot(vec![
            (1, vec![row("1001", "ausgebucht")]),
            (2, vec![row("2001", "buchbar"), row("2002", "ausgebucht")]),
        ])),
    );

    let mut watcher = h.watcher(config()).await;
    let report = watcher.run_cycle(&CancellationToken::new()).await;

    assert_eq!(report.events_found, 2);
    assert_eq!(report.events_notified, 1);
    let sent = h.notifier.sent();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].text.contains("Nr.=2001"));
    assert!(!sent[0].text.contains("Nr.=2002"));
}

#[tokio::test]
async fn test_one_failing_course_does_not_block_others() {
    let h = Harness::new();
    let mut config = config();
    config.courses = vec![course("Klettern"), course("Krafttraining")];

    h.seed(set(vec![(
        "Krafttraining",
        snapshot(vec![(1, vec![row("1001", "ausgebucht")])]),
    )]))
    .await;
    h.source.set("Klettern", Page::ParseFails);
    h.source.set(
        "Krafttraining",
        Page::Ok(snapshot(vec![(1, vec![row("1001", "buchbar")])])),
    );

    let mut watcher = h.watcher(config).await;
    let report = watcher.run_cycle(&CancellationToken::new()).await;

    assert_eq!(report.courses_ok, 1);
    assert_eq!(report.courses_failed, 1);
    assert_eq!(report.notifications_sent, 2);

    let subjects: Vec<String> = h.notifier.sent().into_iter().map(|m| m.subject).collect();
    assert_eq!(subjects[0], "parse-error: Klettern");
    assert!(subjects[1].starts_with("Course update: 1 change"));
}

#[tokio::test]
async fn test_notify_failure_still_persists() {
    let h = Harness::new();
    h.seed(set(vec![(
        "Krafttraining",
        snapshot(vec![(1, vec![row("1001", "ausgebucht")])]),
    )]))
    .await;
    let current = snapshot(vec![(1, vec![row("1001", "buchbar")])]);
    h.source.set("Krafttraining", Page::Ok(current.clone()));
    h.notifier.failing.store(true, Ordering::SeqCst);

    let mut watcher = h.watcher(config()).await;
    let report = watcher.run_cycle(&CancellationToken::new()).await;

    assert_eq!(report.events_notified, 1);
    assert_eq!(report.notifications_sent, 0);
    assert!(report.saved);
    let stored = h.storage.load_snapshots().await.unwrap();
    assert_eq!(stored.get("Krafttraining"), Some(&current));
}

#[tokio::test]
async fn test_cancelled_cycle_checks_nothing() {
    let h = Harness::new();
    h.source.set(
        "Krafttraining",
        Page::Ok(snapshot(vec![(1, vec![row("1001", "buchbar")])])),
    );
    let mut watcher = h.watcher(config()).await;

    let cancel = CancellationToken::new();
    cancel.cancel();
    watcher.run(cancel).await;

    assert!(watcher.snapshots().is_empty());
    assert!(h.storage.load_snapshots().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_reloaded_config_applies_next_cycle() {
    let h = Harness::new();
    h.seed(set(vec![(
        "Krafttraining",
        snapshot(vec![(1, vec![row("1001", "ausgebucht")])]),
    )]))
    .await;
    h.source.set(
        "Krafttraining",
        Page::Ok(snapshot(vec![(1, vec![row("1001", "Warteliste")])])),
    );

    let mut watcher = h.watcher(config()).await;
    let mut updated = config();
    updated.interesting_status = vec!["Warteliste".into()];
    watcher.set_config(updated);

    let report = watcher.run_cycle(&CancellationToken::new()).await;
    assert_eq!(report.events_notified, 1);
    assert_eq!(h.notifier.sent().len(), 1);
}

#[tokio::test]
async fn test_failed_save_is_retried_next_cycle() {
    let h = Harness::new();
    let prior = snapshot(vec![(1, vec![row("1001", "ausgebucht")])]);
    h.seed(set(vec![("Krafttraining", prior.clone())])).await;
    let current = snapshot(vec![(1, vec![row("1001", "buchbar")])]);
    h.source.set("Krafttraining", Page::Ok(current.clone()));

    let store = FlakyStore {
        inner: LocalStorage::new(h.storage.root_dir()),
        failing_saves: Arc::new(AtomicUsize::new(1)),
    };
    let mut watcher = h.watcher_with_store(config(), Box::new(store)).await;
    let cancel = CancellationToken::new();

    let first = watcher.run_cycle(&cancel).await;
    assert!(!first.saved);
    assert_eq!(first.notifications_sent, 1);
    let stored = h.storage.load_snapshots().await.unwrap();
    assert_eq!(stored.get("Krafttraining"), Some(&prior));

    let second = watcher.run_cycle(&cancel).await;
    assert!(second.saved);
    assert_eq!(second.events_found, 0);
    assert_eq!(h.notifier.sent().len(), 1);
    let stored = h.storage.load_snapshots().await.unwrap();
    assert_eq!(stored.get("Krafttraining"), Some(&current));
}

#[tokio::test]
async fn test_booking_cell_change_without_key_column_is_a_status_change() {
    let h = Harness::new();
    let at = Utc.with_ymd_and_hms(2025, 4, 1, 7, 0, 0).unwrap();
    let table = |booking: &str, status: &str| {
        let row = RowSnapshot::from_pairs(
            [("TagDay", "Mo"), ("ZeitTime", "10:00"), ("Buchung", booking)],
            status,
        );
        CourseSnapshot::new(at).with_table(
            1,
            TableSnapshot::new("Studio", at, vec![row]).with_status_column("Buchung"),
        )
    };
    h.seed(set(vec![("Krafttraining", table("", "buchbar"))])).await;
    h.source
        .set("Krafttraining", Page::Ok(table("abgelaufen", "abgelaufen")));

    let mut watcher = h.watcher(config()).await;
    let report = watcher.run_cycle(&CancellationToken::new()).await;

    assert_eq!(report.events_found, 1);
    assert_eq!(report.events_notified, 0);
    assert!(h.notifier.sent().is_empty());
}
