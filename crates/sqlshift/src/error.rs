//! Error types for the migration generator.

use std::path::PathBuf;

/// Errors that can occur while introspecting, diffing, generating or
/// executing migrations.
#[derive(Debug, thiserror::Error)]
pub enum MigrateError {
    /// Catalog query failed for a reason other than the table being absent.
    #[error("Failed to introspect table '{table}': {source}")]
    Introspection {
        /// Table being introspected.
        table: String,
        /// Underlying database error.
        #[source]
        source: sqlx::Error,
    },

    /// Blocking validation errors for a table's migration.
    #[error("Validation failed for table '{table}':\n{}", .errors.iter().map(|e| format!("  - {}", e)).collect::<Vec<_>>().join("\n"))]
    Validation {
        /// Table whose migration was rejected.
        table: String,
        /// Blocking error messages.
        errors: Vec<String>,
    },

    /// The generator could not translate a diff into SQL.
    #[error("Cannot generate migration for table '{table}': {message}")]
    Generation {
        /// Table being generated.
        table: String,
        /// Reason.
        message: String,
    },

    /// A statement failed while executing a migration.
    #[error("Statement #{index} failed: {message}\n  SQL: {statement}")]
    Execution {
        /// Zero-based position of the statement in the migration.
        index: usize,
        /// The SQL that failed.
        statement: String,
        /// Engine error text.
        message: String,
    },

    /// A disposable database could not be created or torn down.
    #[error("Disposable database error: {0}")]
    Environment(String),

    /// Another generation run holds the lock on the scratch directory.
    #[error("Another generation run is in progress (lock file {0})")]
    AlreadyRunning(PathBuf),

    /// Database error outside of a specific migration statement.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// IO error (reading/writing migration files).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse a migration or models file.
    #[error("Failed to parse '{path}': {message}")]
    ParseError {
        /// Path to the file.
        path: PathBuf,
        /// Error message.
        message: String,
    },

    /// Migration file already exists.
    #[error("Migration file already exists: {0}")]
    MigrationExists(PathBuf),

    /// No migrations directory found.
    #[error("Migrations directory not found: {0}")]
    MigrationsDirNotFound(PathBuf),

    /// Model declarations that cannot be synchronized.
    #[error("Invalid model declarations: {0}")]
    InvalidModels(String),

    /// Migration not found.
    #[error("Migration not found: {0}")]
    MigrationNotFound(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl MigrateError {
    /// Wraps a catalog query failure for `table`.
    pub(crate) fn introspection(table: &str, source: sqlx::Error) -> Self {
        Self::Introspection {
            table: table.to_string(),
            source,
        }
    }

    /// Builds a generation error for `table`.
    pub(crate) fn generation(table: &str, message: impl Into<String>) -> Self {
        Self::Generation {
            table: table.to_string(),
            message: message.into(),
        }
    }
}

/// Result type for migration operations.
pub type Result<T> = std::result::Result<T, MigrateError>;
