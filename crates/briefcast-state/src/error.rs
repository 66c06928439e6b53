//! Error types for briefcast-state.

use thiserror::Error;

/// Errors produced by the run-state persistence layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Database connection error
    #[error("database connection failed: {0}")]
    Connection(String),

    /// Database query error
    #[error("database query failed: {0}")]
    Query(String),

    /// Serialization error
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// Run document not found
    #[error("run not found: {0}")]
    RunNotFound(String),

    /// Stage record not found within a run
    #[error("stage '{stage}' not found in run {run_id}")]
    StageNotFound { run_id: String, stage: String },

    /// Write rejected because the run is in the wrong state
    #[error("run {run_id} is {status}, expected {expected}")]
    InvalidRunState {
        run_id: String,
        status: String,
        expected: String,
    },

    /// Schema setup error
    #[error("schema setup failed: {0}")]
    SchemaSetup(String),
}

impl From<surrealdb::Error> for StoreError {
    fn from(err: surrealdb::Error) -> Self {
        StoreError::Query(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;
