//! Error types for the store module.

use thiserror::Error;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database error from SQLite.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A uniqueness invariant was violated (e.g. second active consent
    /// for the same (story, purpose) pair).
    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),

    /// Record not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Invalid data in storage (unparseable state or JSON column).
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// Migration error.
    #[error("migration error: {0}")]
    Migration(String),

    /// Connection mutex poisoned by a panicked task.
    #[error("store connection poisoned")]
    Poisoned,

    /// Blocking task failed to join.
    #[error("blocking task failed: {0}")]
    Join(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
