//! Error types for the referral ledger
//!
//! This module defines all error types used throughout the crate.
//! Store backends map their driver errors onto this taxonomy at the
//! boundary; the registration orchestrator absorbs every variant and
//! turns it into response text.

use thiserror::Error;

/// Result type alias for referral ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the referral ledger
#[derive(Error, Debug)]
pub enum Error {
    /// No matching record (no prior redemption, unknown referral code)
    #[error("Record not found: {0}")]
    NotFound(String),

    /// Uniqueness violation on the redemption insert
    #[error("Duplicate record: {0}")]
    Duplicate(String),

    /// Persistent backend unreachable
    #[error("Connectivity error: {0}")]
    Connectivity(String),

    /// Redemption transaction failed and was rolled back
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Any other main store failure
    #[error("Database error: {0}")]
    Database(String),

    /// Identity directory query failure
    #[error("Identity directory error: {0}")]
    Directory(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O errors from trigger transports
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Response delivery errors
    #[error("Transport error: {0}")]
    Transport(String),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a "not found" error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a duplicate record error
    pub fn duplicate(msg: impl Into<String>) -> Self {
        Self::Duplicate(msg.into())
    }

    /// Create a connectivity error
    pub fn connectivity(msg: impl Into<String>) -> Self {
        Self::Connectivity(msg.into())
    }

    /// Create a transaction error
    pub fn transaction(msg: impl Into<String>) -> Self {
        Self::Transaction(msg.into())
    }

    /// Create a database error
    pub fn database(msg: impl Into<String>) -> Self {
        Self::Database(msg.into())
    }

    /// Create an identity directory error
    pub fn directory(msg: impl Into<String>) -> Self {
        Self::Directory(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create a transport error
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// True for [`Error::NotFound`]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// True for [`Error::Duplicate`]
    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::Duplicate(_))
    }
}

/// Maps driver errors onto the ledger taxonomy.
///
/// Constraint violations are classified by kind so callers can tell a
/// second redemption (`Duplicate`) from a redemption against a code that
/// does not exist (`NotFound`).
impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        use sqlx::error::ErrorKind;

        match err {
            sqlx::Error::RowNotFound => Self::NotFound("no rows returned".to_string()),
            sqlx::Error::Database(db_err) => match db_err.kind() {
                ErrorKind::UniqueViolation => Self::Duplicate(db_err.message().to_string()),
                ErrorKind::ForeignKeyViolation => Self::NotFound(db_err.message().to_string()),
                _ => Self::Database(db_err.message().to_string()),
            },
            sqlx::Error::Io(e) => Self::Connectivity(e.to_string()),
            sqlx::Error::Tls(e) => Self::Connectivity(e.to_string()),
            sqlx::Error::PoolTimedOut => {
                Self::Connectivity("timed out acquiring a pooled connection".to_string())
            }
            sqlx::Error::PoolClosed => Self::Connectivity("connection pool closed".to_string()),
            other => Self::Database(other.to_string()),
        }
    }
}

/// Helper for converting anyhow::Error to our Error type
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}
