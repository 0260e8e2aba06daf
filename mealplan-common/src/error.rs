//! Common error types for the meal-plan lifecycle services

use thiserror::Error;

/// Common result type for meal-plan operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across the meal-plan services
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested resource not found (or archived)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Disallowed state transition
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Finalization attempted while an event still has several options and no votes
    #[error("Insufficient votes to finalize meal plan {meal_plan_id}: events without votes {event_ids:?}")]
    InsufficientVotes {
        meal_plan_id: String,
        event_ids: Vec<String>,
    },

    /// Change event could not be published
    #[error("Publish error: {0}")]
    Publish(String),

    /// Operation aborted through its cancellation token
    #[error("Operation cancelled")]
    Cancelled,

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Disposition class of an [`Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Validation failed; report to caller (400-class)
    BadInput,
    /// Entity missing or archived (404-class)
    NotFound,
    /// Transition disallowed (409-class)
    Conflict,
    /// Finalization blocked by an event without votes (409-class, specific code)
    InsufficientVotes,
    /// Lock contention, pool exhaustion, publish failure: retry with backoff
    Transient,
    /// Unreachable database, corrupt configuration: propagate
    Fatal,
}

impl Error {
    /// Classify this error per the lifecycle error taxonomy
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidInput(_) => ErrorKind::BadInput,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::Conflict(_) => ErrorKind::Conflict,
            Error::InsufficientVotes { .. } => ErrorKind::InsufficientVotes,
            Error::Publish(_) | Error::Cancelled => ErrorKind::Transient,
            Error::Database(db_err) if is_lock_contention(db_err) => ErrorKind::Transient,
            Error::Database(sqlx::Error::RowNotFound) => ErrorKind::NotFound,
            Error::Database(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                ErrorKind::Conflict
            }
            Error::Database(sqlx::Error::Database(db_err))
                if db_err.is_check_violation() || db_err.is_foreign_key_violation() =>
            {
                ErrorKind::BadInput
            }
            Error::Database(_)
            | Error::Io(_)
            | Error::Serialization(_)
            | Error::Config(_)
            | Error::Internal(_) => ErrorKind::Fatal,
        }
    }

    /// HTTP status class a request handler should answer with
    pub fn http_status(&self) -> u16 {
        match self.kind() {
            ErrorKind::BadInput => 400,
            ErrorKind::NotFound => 404,
            ErrorKind::Conflict | ErrorKind::InsufficientVotes => 409,
            ErrorKind::Transient => 503,
            ErrorKind::Fatal => 500,
        }
    }

    /// Stable machine-readable code, distinguishing insufficient votes from other conflicts
    pub fn code(&self) -> &'static str {
        match self.kind() {
            ErrorKind::BadInput => "bad_input",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::InsufficientVotes => "insufficient_votes",
            ErrorKind::Transient => "transient",
            ErrorKind::Fatal => "fatal",
        }
    }

    /// Whether a bounded retry may succeed
    ///
    /// Cancellation is transient for the caller but must never be retried in-process.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Error::Cancelled) && self.kind() == ErrorKind::Transient
    }
}

/// SQLite busy (5) / locked (6) and pool exhaustion
fn is_lock_contention(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::PoolTimedOut => true,
        sqlx::Error::Database(db_err) => {
            matches!(db_err.code().as_deref(), Some("5") | Some("6") | Some("517"))
                || db_err.message().contains("database is locked")
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_errors_map_to_taxonomy() {
        assert_eq!(Error::InvalidInput("x".into()).kind(), ErrorKind::BadInput);
        assert_eq!(Error::NotFound("x".into()).kind(), ErrorKind::NotFound);
        assert_eq!(Error::Conflict("x".into()).kind(), ErrorKind::Conflict);
        assert_eq!(Error::Config("x".into()).kind(), ErrorKind::Fatal);
        assert_eq!(Error::Publish("timeout".into()).kind(), ErrorKind::Transient);
        assert_eq!(
            Error::Database(sqlx::Error::RowNotFound).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(Error::Database(sqlx::Error::PoolTimedOut).kind(), ErrorKind::Transient);
    }

    #[test]
    fn test_insufficient_votes_has_specific_code() {
        let err = Error::InsufficientVotes {
            meal_plan_id: "plan".into(),
            event_ids: vec!["e2".into()],
        };
        assert_eq!(err.http_status(), 409);
        assert_eq!(err.code(), "insufficient_votes");
        assert_eq!(Error::Conflict("x".into()).code(), "conflict");
    }

    #[test]
    fn test_cancelled_is_not_retryable() {
        assert!(!Error::Cancelled.is_retryable());
        assert!(Error::Database(sqlx::Error::PoolTimedOut).is_retryable());
        assert!(!Error::Internal("boom".into()).is_retryable());
    }
}
