//! Ledger error types.

use mpipe_models::{ParseStatusError, ProcessStatus};
use thiserror::Error;

/// Result type for ledger operations.
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Errors that can occur during ledger operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("{filename} already succeeded; refusing transition to {requested}")]
    AlreadySucceeded {
        filename: String,
        requested: ProcessStatus,
    },

    #[error("No ledger row for {0}")]
    NotFound(String),

    #[error("Failed to configure ledger: {0}")]
    ConfigError(String),

    #[error("Stored status is invalid: {0}")]
    InvalidStatus(#[from] ParseStatusError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl LedgerError {
    pub fn already_succeeded(filename: impl Into<String>, requested: ProcessStatus) -> Self {
        Self::AlreadySucceeded {
            filename: filename.into(),
            requested,
        }
    }

    pub fn not_found(filename: impl Into<String>) -> Self {
        Self::NotFound(filename.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Conflicts describe the row, not the store; retrying will not help.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            LedgerError::AlreadySucceeded { .. } | LedgerError::NotFound(_)
        )
    }

    /// Short label used in metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            LedgerError::AlreadySucceeded { .. } => "already_succeeded",
            LedgerError::NotFound(_) => "not_found",
            LedgerError::ConfigError(_) => "config",
            LedgerError::InvalidStatus(_) => "invalid_status",
            LedgerError::Database(_) | LedgerError::Migration(_) => "database",
        }
    }
}
