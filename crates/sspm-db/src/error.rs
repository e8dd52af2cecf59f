//! Error types for the sspm-db crate.
//!
//! Provides a unified error type that wraps `SQLx` errors with additional context.

use sspm_discovery::DiscoveryError;
use thiserror::Error;

/// Database operation errors.
///
/// # Example
///
/// ```rust
/// use sspm_db::DbError;
///
/// fn handle_error(err: DbError) {
///     match err {
///         DbError::ConnectionFailed(e) => eprintln!("Cannot connect: {}", e),
///         DbError::MigrationFailed(e) => eprintln!("Migration error: {}", e),
///         DbError::QueryFailed(e) => eprintln!("Query error: {}", e),
///         DbError::Decode(msg) => eprintln!("Bad row: {}", msg),
///     }
/// }
/// ```
#[derive(Debug, Error)]
pub enum DbError {
    /// Failed to establish or acquire a database connection.
    ///
    /// This typically indicates network issues, invalid credentials,
    /// or the database server being unavailable.
    #[error("Database connection failed: {0}")]
    ConnectionFailed(#[source] sqlx::Error),

    /// A database migration failed to apply.
    #[error("Migration failed: {0}")]
    MigrationFailed(#[source] sqlx::migrate::MigrateError),

    /// A database query failed to execute.
    #[error("Query failed: {0}")]
    QueryFailed(#[source] sqlx::Error),

    /// A stored value could not be mapped onto a domain type.
    #[error("Decode failed: {0}")]
    Decode(String),
}

impl DbError {
    /// Check if this error indicates a connection problem.
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(self, DbError::ConnectionFailed(_))
    }

    /// Check if this error indicates a migration problem.
    #[must_use]
    pub fn is_migration_error(&self) -> bool {
        matches!(self, DbError::MigrationFailed(_))
    }

    /// Check if this error indicates a query problem.
    #[must_use]
    pub fn is_query_error(&self) -> bool {
        matches!(self, DbError::QueryFailed(_))
    }

    /// True when a query failed on a foreign key (the referenced app is gone).
    #[must_use]
    pub fn is_foreign_key_violation(&self) -> bool {
        match self {
            DbError::QueryFailed(sqlx::Error::Database(e)) => e.is_foreign_key_violation(),
            _ => false,
        }
    }
}

impl From<DbError> for DiscoveryError {
    fn from(err: DbError) -> Self {
        DiscoveryError::Repository(err.to_string())
    }
}
