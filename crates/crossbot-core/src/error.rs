//! Core error types for crossbot-core.
//!
//! This module defines the error hierarchy using thiserror. Degenerate
//! statistics (zero-variance days, all-fail days, dates nobody played) are
//! not errors; they surface as named variants in the result types of the
//! responsible component. Model-fit failures are errors and are always
//! reported loudly.

use std::path::PathBuf;
use thiserror::Error;

/// Core error type for crossbot-core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Rating model fit errors
    #[error("Rating model error: {0}")]
    Rating(#[from] RatingError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Database-specific errors.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Failed to open database connection
    #[error("Failed to open database at {path}: {source}")]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// Query execution failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Migration failed
    #[error("Database migration failed: {0}")]
    MigrationFailed(String),

    /// Database is locked
    #[error("Database is locked")]
    Locked,

    /// A stored row could not be decoded
    #[error("Corrupt row in {table}: {message}")]
    CorruptRow { table: String, message: String },
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to load configuration
    #[error("Failed to load configuration from {path}: {message}")]
    LoadFailed { path: PathBuf, message: String },

    /// Failed to save configuration
    #[error("Failed to save configuration to {path}: {message}")]
    SaveFailed { path: PathBuf, message: String },

    /// Unknown dotted key
    #[error("Unknown configuration key: {0}")]
    UnknownKey(String),

    /// Invalid configuration value
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    /// No usable data directory
    #[error("Could not determine data directory: {0}")]
    NoDataDir(String),
}

/// Validation errors.
#[derive(Error, Debug)]
pub enum ValidationError {
    /// Invalid date range
    #[error("Invalid date range: end ({end}) is before start ({start})")]
    InvalidDateRange {
        start: chrono::NaiveDate,
        end: chrono::NaiveDate,
    },

    /// Unknown puzzle tag
    #[error("Unknown puzzle type: {0}")]
    UnknownPuzzle(String),

    /// Time string could not be parsed
    #[error("Invalid time '{0}': expected m:ss, :ss, seconds or 'fail'")]
    InvalidTime(String),

    /// Invalid value
    #[error("Invalid value for '{field}': {message}")]
    InvalidValue { field: String, message: String },
}

/// Rating model fit errors.
///
/// Any of these aborts the fit before the stored snapshot is touched.
#[derive(Error, Debug)]
pub enum RatingError {
    /// Nothing to fit
    #[error("Not enough data to fit the rating model ({observations} observations)")]
    InsufficientData { observations: usize },

    /// Sampler output does not match the data contract
    #[error("Sampler output shape mismatch for {parameter}: expected {expected}, got {actual}")]
    ShapeMismatch {
        parameter: String,
        expected: usize,
        actual: usize,
    },

    /// Chains disagree
    #[error(
        "Sampler did not converge: R-hat for {parameter} is {rhat:.3} (threshold {threshold:.3})"
    )]
    NotConverged {
        parameter: String,
        rhat: f64,
        threshold: f64,
    },

    /// Draws were fitted against different data
    #[error("Posterior draws were fitted against data {actual}, current data is {expected}")]
    StaleDraws { expected: String, actual: String },

    /// Too few draws to compute diagnostics
    #[error("Too few posterior draws: need at least {required} per chain, got {actual}")]
    TooFewDraws { required: usize, actual: usize },

    /// The sampler itself failed
    #[error("Sampler failed: {0}")]
    Sampler(String),

    /// IO errors while reading sampler output
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed sampler output
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<rusqlite::Error> for DatabaseError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(e, _msg) => {
                if e.code == rusqlite::ErrorCode::DatabaseLocked {
                    DatabaseError::Locked
                } else {
                    DatabaseError::QueryFailed(err.to_string())
                }
            }
            _ => DatabaseError::QueryFailed(err.to_string()),
        }
    }
}

impl From<rusqlite::Error> for CoreError {
    fn from(err: rusqlite::Error) -> Self {
        CoreError::Database(err.into())
    }
}

/// Result type alias for CoreError
pub type Result<T, E = CoreError> = std::result::Result<T, E>;
