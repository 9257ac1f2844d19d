//! Application configuration structures.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, FailureKind, Result};

/// Root application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Seconds to sleep between two polling cycles
    #[serde(default = "defaults::interval")]
    pub interval_secs: u64,

    /// Status values worth a notification
    #[serde(default = "defaults::interesting_status")]
    pub interesting_status: Vec<String>,

    /// Also notify when non-status columns of a row change
    #[serde(default)]
    pub notify_field_changes: bool,

    /// Cool-down for error categories not listed in `error_timeouts`
    #[serde(default = "defaults::error_timeout")]
    pub default_error_timeout_secs: u64,

    /// Cool-down in seconds per error category
    #[serde(default)]
    pub error_timeouts: HashMap<String, u64>,

    /// Category labels used for course check failures
    #[serde(default)]
    pub error_categories: ErrorCategories,

    /// HTTP behavior settings
    #[serde(default)]
    pub crawler: CrawlerConfig,

    /// Table extraction rules
    #[serde(default)]
    pub parser: ParserConfig,

    /// Log file settings
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Monitored course pages
    #[serde(default = "defaults::courses")]
    pub courses: Vec<CourseConfig>,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load configuration or return default if loading fails.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(&path).unwrap_or_else(|e| {
            log::warn!(
                "Config load failed from {:?}: {}. Using defaults.",
                path.as_ref(),
                e
            );
            Self::default()
        })
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        if self.interval_secs == 0 {
            return Err(AppError::validation("interval_secs must be > 0"));
        }
        if self.interesting_status.iter().all(|s| s.trim().is_empty()) {
            return Err(AppError::validation("interesting_status is empty"));
        }
        if self.crawler.user_agent.trim().is_empty() {
            return Err(AppError::validation("crawler.user_agent is empty"));
        }
        if self.crawler.timeout_secs == 0 {
            return Err(AppError::validation("crawler.timeout_secs must be > 0"));
        }
        if self.parser.table_selector.trim().is_empty() {
            return Err(AppError::validation("parser.table_selector is empty"));
        }
        if self.courses.is_empty() {
            return Err(AppError::validation("No courses defined"));
        }

        let mut names = HashSet::new();
        for course in &self.courses {
            if course.name.trim().is_empty() {
                return Err(AppError::validation("Course with empty name"));
            }
            if !names.insert(course.name.as_str()) {
                return Err(AppError::validation(format!(
                    "Duplicate course name '{}'",
                    course.name
                )));
            }
            url::Url::parse(&course.url).map_err(|e| {
                AppError::validation(format!("Course '{}' has invalid url: {e}", course.name))
            })?;
            if course.tables.is_empty() {
                return Err(AppError::validation(format!(
                    "Course '{}' has no tables",
                    course.name
                )));
            }
            let mut indices = HashSet::new();
            for table in &course.tables {
                if !indices.insert(table.index) {
                    return Err(AppError::validation(format!(
                        "Course '{}' lists table {} twice",
                        course.name, table.index
                    )));
                }
            }
        }
        Ok(())
    }

    /// Interesting status values as a lookup set.
    pub fn interesting_set(&self) -> HashSet<String> {
        self.interesting_status.iter().cloned().collect()
    }

    /// Category label for a failure kind.
    pub fn category_for(&self, kind: FailureKind) -> &str {
        match kind {
            FailureKind::Fetch => &self.error_categories.fetch,
            FailureKind::Parse => &self.error_categories.parse,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            interval_secs: defaults::interval(),
            interesting_status: defaults::interesting_status(),
            notify_field_changes: false,
            default_error_timeout_secs: defaults::error_timeout(),
            error_timeouts: HashMap::new(),
            error_categories: ErrorCategories::default(),
            crawler: CrawlerConfig::default(),
            parser: ParserConfig::default(),
            logging: LoggingConfig::default(),
            courses: defaults::courses(),
        }
    }
}

/// One monitored course page.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CourseConfig {
    /// Display name, unique within the config
    pub name: String,

    /// Page URL
    pub url: String,

    /// Tables on the page to watch
    #[serde(default)]
    pub tables: Vec<TableConfig>,
}

impl CourseConfig {
    pub fn new(name: impl Into<String>, url: impl Into<String>, tables: Vec<TableConfig>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            tables,
        }
    }
}

/// A table on a course page, by position.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TableConfig {
    /// Position among the tables matched by `parser.table_selector`
    pub index: usize,

    /// Human-readable name used in notifications
    #[serde(default)]
    pub label: String,
}

impl TableConfig {
    pub fn new(index: usize, label: impl Into<String>) -> Self {
        Self {
            index,
            label: label.into(),
        }
    }

    /// Label, or a generated one when the config leaves it empty.
    pub fn display_label(&self) -> String {
        if self.label.trim().is_empty() {
            format!("Table {}", self.index)
        } else {
            self.label.clone()
        }
    }
}

/// Error category labels.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorCategories {
    #[serde(default = "defaults::fetch_category")]
    pub fetch: String,

    #[serde(default = "defaults::parse_category")]
    pub parse: String,
}

impl Default for ErrorCategories {
    fn default() -> Self {
        Self {
            fetch: defaults::fetch_category(),
            parse: defaults::parse_category(),
        }
    }
}

/// HTTP client settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlerConfig {
    /// User-Agent header for HTTP requests
    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,

    /// Request timeout in seconds
    #[serde(default = "defaults::timeout")]
    pub timeout_secs: u64,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            user_agent: defaults::user_agent(),
            timeout_secs: defaults::timeout(),
        }
    }
}

/// How tables, rows and status values are read from a page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParserConfig {
    /// CSS selector matching the course tables, in page order
    #[serde(default = "defaults::table_selector")]
    pub table_selector: String,

    /// Columns that identify a row; the first one present wins
    #[serde(default = "defaults::key_columns")]
    pub key_columns: Vec<String>,

    /// Rules mapping the last cell's markup to a status
    #[serde(default = "defaults::status_rules")]
    pub status_rules: Vec<StatusRule>,

    /// Status when no rule matches
    #[serde(default = "defaults::default_status")]
    pub default_status: String,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            table_selector: defaults::table_selector(),
            key_columns: defaults::key_columns(),
            status_rules: defaults::status_rules(),
            default_status: defaults::default_status(),
        }
    }
}

/// A status derived from the presence of an element in the booking cell.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusRule {
    /// CSS selector evaluated inside the row's last cell
    pub selector: String,

    /// Status assigned when the selector matches
    pub status: String,
}

impl StatusRule {
    pub fn new(selector: impl Into<String>, status: impl Into<String>) -> Self {
        Self {
            selector: selector.into(),
            status: status.into(),
        }
    }
}

/// Log file settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log file name, relative to the storage directory
    #[serde(default = "defaults::log_file")]
    pub file: String,

    /// Rotate when the file grows beyond this size
    #[serde(default = "defaults::log_max_bytes")]
    pub max_bytes: u64,

    /// Number of rotated files to keep
    #[serde(default = "defaults::log_backups")]
    pub backups: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            file: defaults::log_file(),
            max_bytes: defaults::log_max_bytes(),
            backups: defaults::log_backups(),
        }
    }
}

mod defaults {
    use super::{CourseConfig, StatusRule, TableConfig};

    pub fn interval() -> u64 {
        600
    }
    pub fn interesting_status() -> Vec<String> {
        vec!["buchen".into(), "Warteliste".into(), "buchbar_ab".into()]
    }
    pub fn error_timeout() -> u64 {
        3600
    }
    pub fn fetch_category() -> String {
        "fetch-error".into()
    }
    pub fn parse_category() -> String {
        "parse-error".into()
    }

    // Crawler defaults
    pub fn user_agent() -> String {
        "Mozilla/5.0 (compatible; course-watch/0.1)".into()
    }
    pub fn timeout() -> u64 {
        10
    }

    // Parser defaults
    pub fn table_selector() -> String {
        "table.bs_kurse".into()
    }
    pub fn key_columns() -> Vec<String> {
        vec![
            "Nr.".into(),
            "Kursnummer".into(),
            "kurs_nr".into(),
            "Nr".into(),
            "KursnrNo.".into(),
        ]
    }
    pub fn status_rules() -> Vec<StatusRule> {
        vec![
            StatusRule::new("span.bs_btn_abgelaufen", "abgelaufen"),
            StatusRule::new("input.bs_btn_warteliste", "Warteliste"),
            StatusRule::new("input.bs_btn_buchen", "buchen"),
            StatusRule::new("span.bs_btn_autostart", "buchbar_ab"),
        ]
    }
    pub fn default_status() -> String {
        "unbekannt".into()
    }

    // Logging defaults
    pub fn log_file() -> String {
        "course-watch.log".into()
    }
    pub fn log_max_bytes() -> u64 {
        5 * 1024 * 1024
    }
    pub fn log_backups() -> usize {
        3
    }

    pub fn courses() -> Vec<CourseConfig> {
        vec![CourseConfig::new(
            "Krafttraining",
            "https://www.buchung.zhs-muenchen.de/angebote/aktueller_zeitraum_0/_Krafttraining_-_Studio.html",
            vec![TableConfig::new(0, "Studio")],
        )]
    }
}
