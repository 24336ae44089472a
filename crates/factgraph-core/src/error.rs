//! Error types for Factgraph

use thiserror::Error;

/// Result type alias using Factgraph's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Factgraph error types with helpful messages and suggestions
#[derive(Error, Debug)]
pub enum Error {
    // Query errors (E001-E099)
    #[error("Query too short ({0} characters, minimum {1}). Skip the graph lookup for this turn.")]
    QueryTooShort(usize, usize),

    // Store errors (E100-E199)
    #[error("Fact store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Full-text index is stale or missing: {0}. Run `factgraph doctor --rebuild`.")]
    IndexStale(String),

    #[error("Database error: {0}")]
    DatabaseError(sqlx::Error),

    // Activation errors (E200-E299)
    #[error("A decay sweep is already running. Try again once it finishes.")]
    DecayInProgress,

    // Host errors (E300-E399)
    #[error("Graph lookup timed out after {0} ms")]
    Timeout(u64),

    // Config errors (E600-E699)
    #[error("Configuration error: {0}")]
    ConfigError(String),

    // Input errors (E800-E899)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // Generic errors
    #[error("{0}")]
    Other(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        let pool_failure = matches!(
            err,
            sqlx::Error::PoolTimedOut
                | sqlx::Error::PoolClosed
                | sqlx::Error::WorkerCrashed
                | sqlx::Error::Io(_)
        );
        if pool_failure {
            return Self::StoreUnavailable(err.to_string());
        }

        let db_message = err.as_database_error().map(|e| e.message().to_string());
        match db_message {
            Some(message) if is_index_failure(&message.to_lowercase()) => {
                Self::IndexStale(message)
            }
            Some(message) if is_lock_failure(&message.to_lowercase()) => {
                Self::StoreUnavailable(message)
            }
            _ => Self::DatabaseError(err),
        }
    }
}

fn is_lock_failure(message: &str) -> bool {
    message.contains("database is locked")
        || message.contains("unable to open")
        || message.contains("disk i/o")
}

/// SQLite reports FTS5 shadow-table problems through a handful of messages.
fn is_index_failure(message: &str) -> bool {
    message.contains("fts5")
        || message.contains("_fts")
        || message.contains("vtable")
        || message.contains("malformed")
}

impl Error {
    /// Get error code for this error type
    pub fn code(&self) -> &'static str {
        match self {
            Self::QueryTooShort(..) => "E001",
            Self::StoreUnavailable(_) => "E100",
            Self::IndexStale(_) => "E101",
            Self::DatabaseError(_) => "E102",
            Self::DecayInProgress => "E200",
            Self::Timeout(_) => "E300",
            Self::ConfigError(_) => "E600",
            Self::InvalidInput(_) => "E800",
            Self::Other(_) | Self::Io(_) => "E9999",
        }
    }

    /// Get suggestion for how to fix this error
    pub fn suggestion(&self) -> Option<String> {
        match self {
            Self::StoreUnavailable(_) => Some("factgraph doctor".to_string()),
            Self::IndexStale(_) => Some("factgraph doctor --rebuild".to_string()),
            Self::DecayInProgress => Some("wait for the running sweep to finish".to_string()),
            Self::ConfigError(_) => Some("factgraph config list".to_string()),
            _ => None,
        }
    }

    /// Whether this failure means the store could not answer at all.
    ///
    /// A stale index is treated the same as an unavailable store for query purposes.
    pub fn is_store_failure(&self) -> bool {
        matches!(
            self,
            Self::StoreUnavailable(_) | Self::IndexStale(_) | Self::DatabaseError(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_distinct() {
        let errors = [
            Error::QueryTooShort(2, 5),
            Error::StoreUnavailable("x".into()),
            Error::IndexStale("x".into()),
            Error::DecayInProgress,
            Error::Timeout(100),
            Error::ConfigError("x".into()),
            Error::InvalidInput("x".into()),
        ];
        let mut codes: Vec<_> = errors.iter().map(|e| e.code()).collect();
        codes.sort();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn test_pool_timeout_is_store_unavailable() {
        let err: Error = sqlx::Error::PoolTimedOut.into();
        assert!(matches!(err, Error::StoreUnavailable(_)));
        assert!(err.is_store_failure());
        assert_eq!(err.code(), "E100");
    }

    #[test]
    fn test_index_failure_messages() {
        assert!(is_index_failure("no such table: facts_fts"));
        assert!(is_index_failure("fts5: syntax error near \"\""));
        assert!(is_index_failure("database disk image is malformed"));
        assert!(!is_index_failure("unique constraint failed: facts.entity"));
    }

    #[test]
    fn test_query_too_short_message() {
        let err = Error::QueryTooShort(3, 5);
        assert!(err.to_string().contains("3 characters"));
        assert!(!err.is_store_failure());
        assert!(err.suggestion().is_none());
    }

    #[test]
    fn test_suggestions() {
        assert_eq!(
            Error::IndexStale("x".into()).suggestion().as_deref(),
            Some("factgraph doctor --rebuild")
        );
    }
}
