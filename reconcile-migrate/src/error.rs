//! Error types for the migration engine.

use thiserror::Error;

/// Result type alias for migration operations.
pub type MigrateResult<T> = Result<T, MigrationError>;

/// Errors that can occur during migration operations.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// File system error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The target schema is malformed.
    #[error("Schema error: {0}")]
    Schema(#[from] reconcile_model::SchemaError),

    /// Reading the live database structure failed.
    #[error("Failed to introspect database: {0}")]
    Introspection(String),

    /// Database operation error.
    #[error("Database error: {0}")]
    Database(String),

    /// Another process holds the lock for this migration.
    #[error("Migration '{0}' is already locked by another process")]
    LockContention(String),

    /// Lock acquisition failed for a reason other than contention.
    #[error("Failed to acquire migration lock: {0}")]
    LockFailed(String),

    /// A statement was rejected by the database.
    #[error("Failed to execute statement `{statement}`: {message}")]
    Execution {
        /// The statement that failed.
        statement: String,
        /// Driver error message.
        message: String,
    },

    /// Migration not found in history.
    #[error("Migration '{0}' not found in history")]
    NotFound(String),

    /// A rollback was requested but no inverse could be derived.
    #[error("Cannot rollback migration '{id}': {}", .reasons.join("; "))]
    RollbackUnavailable {
        /// Migration ID.
        id: String,
        /// Why each statement could not be reversed.
        reasons: Vec<String>,
    },

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A bookkeeping column could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl MigrationError {
    /// Create a database error.
    pub fn database(msg: impl Into<String>) -> Self {
        Self::Database(msg.into())
    }

    /// Create an introspection error.
    pub fn introspection(msg: impl Into<String>) -> Self {
        Self::Introspection(msg.into())
    }

    /// Create a lock failure error.
    pub fn lock_failed(msg: impl Into<String>) -> Self {
        Self::LockFailed(msg.into())
    }

    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a statement execution error.
    pub fn execution(statement: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Execution {
            statement: statement.into(),
            message: message.into(),
        }
    }

    /// Check if the caller can reasonably retry the operation.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::LockContention(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = MigrationError::database("connection refused");
        assert_eq!(err.to_string(), "Database error: connection refused");

        let err = MigrationError::introspection("no such table");
        assert_eq!(err.to_string(), "Failed to introspect database: no such table");

        let err = MigrationError::LockContention("schema".into());
        assert_eq!(
            err.to_string(),
            "Migration 'schema' is already locked by another process"
        );
    }

    #[test]
    fn test_rollback_unavailable_display() {
        let err = MigrationError::RollbackUnavailable {
            id: "migration_1".into(),
            reasons: vec!["a".into(), "b".into()],
        };
        assert_eq!(err.to_string(), "Cannot rollback migration 'migration_1': a; b");
    }

    #[test]
    fn test_is_recoverable() {
        assert!(MigrationError::LockContention("x".into()).is_recoverable());
        assert!(!MigrationError::lock_failed("x").is_recoverable());
        assert!(!MigrationError::NotFound("x".into()).is_recoverable());
    }
}
