// src/services/courses.rs

//! Course page scraper.
//!
//! Fetches a course page and turns the configured tables into a
//! [`CourseSnapshot`] using the parser rules from the configuration.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use scraper::{ElementRef, Html, Selector};

use crate::error::{AppError, Result};
use crate::models::{
    CourseConfig, CourseSnapshot, CrawlerConfig, ParserConfig, RowSnapshot, TableSnapshot,
};
use crate::utils::{http, normalize_whitespace};

/// Produces the current snapshot of a course.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    /// Fetch and parse one course page.
    ///
    /// Fails with `AppError::Fetch`/`AppError::Http` when the page cannot be
    /// retrieved and `AppError::Parse` when its tables are not as configured.
    async fn snapshot(&self, course: &CourseConfig) -> Result<CourseSnapshot>;
}

/// Service for scraping course tables over HTTP.
pub struct CourseScraper {
    client: Client,
    parser: ParserConfig,
}

impl CourseScraper {
    /// Create a new scraper with the given settings.
    pub fn new(crawler: &CrawlerConfig, parser: ParserConfig) -> Result<Self> {
        let client = http::create_async_client(crawler)?;
        Ok(Self { client, parser })
    }
}

#[async_trait]
impl SnapshotSource for CourseScraper {
    async fn snapshot(&self, course: &CourseConfig) -> Result<CourseSnapshot> {
        log::debug!("Fetching {} from {}", course.name, course.url);
        let html = http::fetch_text(&self.client, &course.url)
            .await
            .map_err(|e| match e {
                AppError::Http(err) => AppError::fetch(&course.name, err),
                other => other,
            })?;

        let snapshot = parse_course(&html, course, &self.parser, Utc::now())?;
        log::debug!(
            "{}: {} tables, {} rows",
            course.name,
            snapshot.tables.len(),
            snapshot.row_count()
        );
        Ok(snapshot)
    }
}

/// Parse the configured tables of a course page.
pub fn parse_course(
    html: &str,
    course: &CourseConfig,
    parser: &ParserConfig,
    captured_at: DateTime<Utc>,
) -> Result<CourseSnapshot> {
    let document = Html::parse_document(html);
    let selectors = TableSelectors::new(parser)?;

    let tables: Vec<ElementRef> = document.select(&selectors.table).collect();
    let mut snapshot = CourseSnapshot::new(captured_at);

    for table_cfg in &course.tables {
        let table = tables.get(table_cfg.index).ok_or_else(|| {
            AppError::parse(
                &course.name,
                format!(
                    "table {} not found, page has {} tables matching '{}'",
                    table_cfg.index,
                    tables.len(),
                    parser.table_selector
                ),
            )
        })?;

        let headers = selectors.headers(table);
        if headers.is_empty() {
            return Err(AppError::parse(
                &course.name,
                format!("table {} has no header cells", table_cfg.index),
            ));
        }

        let rows = selectors.rows(table, &headers, &parser.default_status);
        let mut parsed = TableSnapshot::new(table_cfg.display_label(), captured_at, rows);
        if let Some(status_column) = headers.last() {
            parsed = parsed.with_status_column(status_column.as_str());
        }
        snapshot.tables.insert(table_cfg.index, parsed);
    }

    Ok(snapshot)
}

/// Compiled selectors for one parse run.
struct TableSelectors<'a> {
    table: Selector,
    head_cell: Selector,
    any_row: Selector,
    header_cell: Selector,
    body_row: Selector,
    data_cell: Selector,
    rules: Vec<(Selector, &'a str)>,
}

impl<'a> TableSelectors<'a> {
    fn new(parser: &'a ParserConfig) -> Result<Self> {
        let rules = parser
            .status_rules
            .iter()
            .map(|rule| -> Result<(Selector, &'a str)> {
                Ok((parse_selector(&rule.selector)?, rule.status.as_str()))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            table: parse_selector(&parser.table_selector)?,
            head_cell: parse_selector("thead th")?,
            any_row: parse_selector("tr")?,
            header_cell: parse_selector("td, th")?,
            body_row: parse_selector("tbody tr")?,
            data_cell: parse_selector("td")?,
            rules,
        })
    }

    /// Header names from `thead`, or the first row's cells when there is none.
    fn headers(&self, table: &ElementRef) -> Vec<String> {
        let headers: Vec<String> = table.select(&self.head_cell).map(|th| cell_text(&th)).collect();
        if !headers.is_empty() {
            return headers;
        }

        table
            .select(&self.any_row)
            .next()
            .map(|tr| tr.select(&self.header_cell).map(|c| cell_text(&c)).collect())
            .unwrap_or_default()
    }

    /// Data rows whose cell count matches the header count.
    fn rows(&self, table: &ElementRef, headers: &[String], default_status: &str) -> Vec<RowSnapshot> {
        let mut rows = Vec::new();
        for row in table.select(&self.body_row) {
            let cells: Vec<ElementRef> = row.select(&self.data_cell).collect();
            if cells.len() != headers.len() {
                continue;
            }

            let fields: BTreeMap<String, String> = headers
                .iter()
                .zip(cells.iter())
                .map(|(header, cell)| (header.clone(), cell_text(cell)))
                .collect();

            let status = cells
                .last()
                .and_then(|last| self.status_of(last))
                .unwrap_or(default_status);

            rows.push(RowSnapshot::new(fields, status));
        }
        rows
    }

    /// First rule whose selector matches inside the booking cell.
    fn status_of(&self, cell: &ElementRef) -> Option<&'a str> {
        self.rules
            .iter()
            .find(|(sel, _)| cell.select(sel).next().is_some())
            .map(|(_, status)| *status)
    }
}

fn cell_text(cell: &ElementRef) -> String {
    normalize_whitespace(&cell.text().collect::<String>())
}

fn parse_selector(s: &str) -> Result<Selector> {
    Selector::parse(s).map_err(|e| AppError::selector(s, format!("{e:?}")))
}
