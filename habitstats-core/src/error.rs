//! Error types for habitstats-core

use thiserror::Error;

use crate::narrative::NarrativeError;

/// Main error type for the habitstats-core library
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed stored value (timestamp, weekday list, ...)
    #[error("parse error in {context}: {message}")]
    Parse { context: String, message: String },

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Narrative generation failed
    #[error("narrative error: {0}")]
    Narrative(#[from] NarrativeError),

    /// Habit not found
    #[error("habit not found: {0}")]
    HabitNotFound(i64),

    /// Unknown time range name
    #[error("invalid time range: {0} (expected week, month, quarter or year)")]
    InvalidTimeRange(String),
}

impl Error {
    /// Build a parse error for a named context.
    pub fn parse(context: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Parse {
            context: context.into(),
            message: message.into(),
        }
    }
}

/// Result type alias for habitstats-core
pub type Result<T> = std::result::Result<T, Error>;
