//! Error types for configuration, storage, and collaborator calls.

use thiserror::Error;

/// Application-level errors
#[derive(Debug, Error)]
pub enum AppError {
    /// Invalid or missing configuration.
    #[error("Configuration error: {message}")]
    Config {
        /// What was wrong with the configuration.
        message: String,
    },

    /// Persistence layer failure.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// External collaborator (classifier, critic, embedder) failure.
    #[error("Collaborator error: {0}")]
    Collaborator(#[from] CollaboratorError),

    /// Anything else.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the failure.
        message: String,
    },
}

/// Storage layer errors
#[derive(Debug, Error)]
pub enum StorageError {
    /// Could not open or reach the database.
    #[error("Database connection failed: {message}")]
    Connection {
        /// Connection failure details.
        message: String,
    },

    /// A query failed after the connection was established.
    #[error("Query failed: {message}")]
    Query {
        /// Query failure details.
        message: String,
    },

    /// Schema migration failure at startup.
    #[error("Migration failed: {message}")]
    Migration {
        /// Migration failure details.
        message: String,
    },

    /// Underlying SQLx error.
    #[error("SQLx error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

/// Errors from the external classifier, critic, and embedder services.
///
/// The pipeline never propagates these to its caller; every variant degrades
/// to the safe default verdict (or an empty threat match) and is logged.
#[derive(Debug, Error)]
pub enum CollaboratorError {
    /// Service unreachable after exhausting retries.
    #[error("Collaborator unavailable: {message} (retries: {retries})")]
    Unavailable {
        /// Last error observed.
        message: String,
        /// Number of retries attempted.
        retries: u32,
    },

    /// Non-success HTTP status from the service.
    #[error("API error: {status} - {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Response body.
        message: String,
    },

    /// Response body could not be parsed into the expected structure.
    #[error("Invalid response: {message}")]
    InvalidResponse {
        /// Parse failure details.
        message: String,
    },

    /// Request exceeded its bounded timeout.
    #[error("Request timeout after {timeout_ms}ms")]
    Timeout {
        /// Configured timeout in milliseconds.
        timeout_ms: u64,
    },

    /// Underlying HTTP transport error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Result type alias for application errors
pub type AppResult<T> = Result<T, AppError>;

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Result type alias for collaborator operations
pub type CollaboratorResult<T> = Result<T, CollaboratorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_error_display() {
        let err = AppError::Config {
            message: "missing key".to_string(),
        };
        assert_eq!(err.to_string(), "Configuration error: missing key");

        let err = AppError::Internal {
            message: "unexpected".to_string(),
        };
        assert_eq!(err.to_string(), "Internal error: unexpected");
    }

    #[test]
    fn test_storage_error_display() {
        let err = StorageError::Connection {
            message: "failed to connect".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Database connection failed: failed to connect"
        );

        let err = StorageError::Query {
            message: "syntax error".to_string(),
        };
        assert_eq!(err.to_string(), "Query failed: syntax error");

        let err = StorageError::Migration {
            message: "version mismatch".to_string(),
        };
        assert_eq!(err.to_string(), "Migration failed: version mismatch");
    }

    #[test]
    fn test_collaborator_error_display() {
        let err = CollaboratorError::Unavailable {
            message: "server down".to_string(),
            retries: 3,
        };
        assert_eq!(
            err.to_string(),
            "Collaborator unavailable: server down (retries: 3)"
        );

        let err = CollaboratorError::Api {
            status: 401,
            message: "unauthorized".to_string(),
        };
        assert_eq!(err.to_string(), "API error: 401 - unauthorized");

        let err = CollaboratorError::InvalidResponse {
            message: "malformed JSON".to_string(),
        };
        assert_eq!(err.to_string(), "Invalid response: malformed JSON");

        let err = CollaboratorError::Timeout { timeout_ms: 5000 };
        assert_eq!(err.to_string(), "Request timeout after 5000ms");
    }

    #[test]
    fn test_storage_error_conversion_to_app_error() {
        let storage_err = StorageError::Query {
            message: "bad".to_string(),
        };
        let app_err: AppError = storage_err.into();
        assert!(matches!(app_err, AppError::Storage(_)));
    }

    #[test]
    fn test_collaborator_error_conversion_to_app_error() {
        let err = CollaboratorError::Timeout { timeout_ms: 1000 };
        let app_err: AppError = err.into();
        assert!(matches!(app_err, AppError::Collaborator(_)));
    }
}
