// src/error.rs

//! Unified error handling for the watcher.

use std::fmt;
use std::path::Path;

use thiserror::Error;

/// Result type alias for watcher operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Unified application error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing failed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// URL parsing failed
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    /// CSS selector parsing failed
    #[error("Invalid selector '{selector}': {message}")]
    Selector { selector: String, message: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Data validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Page could not be fetched (status, timeout, network)
    #[error("Fetch error for {context}: {message}")]
    Fetch { context: String, message: String },

    /// Page was fetched but the expected tables were not there
    #[error("Parse error for {context}: {message}")]
    Parse { context: String, message: String },

    /// Persisted state exists but cannot be read back
    #[error("Corrupt state in {path}: {message}")]
    CorruptState { path: String, message: String },

    /// Notification could not be delivered
    #[error("Notification error: {0}")]
    Notify(String),
}

/// Failure classes of a single course check.
///
/// Each maps to one error-notification category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Fetch,
    Parse,
}

impl AppError {
    /// Create a selector parsing error.
    pub fn selector(selector: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Selector {
            selector: selector.into(),
            message: message.to_string(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a fetch error with context.
    pub fn fetch(context: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Fetch {
            context: context.into(),
            message: message.to_string(),
        }
    }

    /// Create a parse error with context.
    pub fn parse(context: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Parse {
            context: context.into(),
            message: message.to_string(),
        }
    }

    /// Create a corrupt-state error for the given file.
    pub fn corrupt_state(path: &Path, message: impl fmt::Display) -> Self {
        Self::CorruptState {
            path: path.display().to_string(),
            message: message.to_string(),
        }
    }

    /// Create a notification delivery error.
    pub fn notify(message: impl fmt::Display) -> Self {
        Self::Notify(message.to_string())
    }

    /// Classify a course check failure.
    ///
    /// Network-level errors count as fetch failures; everything else that can
    /// come out of a scrape means the page did not look as expected.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Self::Fetch { .. } | Self::Http(_) | Self::Io(_) => FailureKind::Fetch,
            _ => FailureKind::Parse,
        }
    }
}
