//! Error types for the data access layer.

use thiserror::Error;

/// Result alias for data layer operations.
pub type Result<T> = std::result::Result<T, DataError>;

/// Errors raised by the data access layer.
#[derive(Debug, Error)]
pub enum DataError {
    /// Migration execution failed.
    #[error("migration failed")]
    MigrationFailed {
        /// Underlying migration error.
        source: sqlx::migrate::MigrateError,
    },
    /// A database operation failed.
    #[error("database operation failed")]
    QueryFailed {
        /// Operation identifier.
        operation: &'static str,
        /// Underlying SQL error.
        source: sqlx::Error,
    },
    /// A row that the caller requires does not exist.
    #[error("{entity} {id} not found")]
    NotFound {
        /// Entity kind (`device`, `template`).
        entity: &'static str,
        /// Identifier that failed to resolve.
        id: i64,
    },
    /// A unique key would be violated by the write.
    #[error("unique constraint violated: {detail}")]
    UniqueViolation {
        /// Which key collided.
        detail: String,
    },
}

impl DataError {
    pub(crate) fn query(operation: &'static str, source: sqlx::Error) -> Self {
        Self::QueryFailed { operation, source }
    }

    /// Whether the error is a unique-key collision (conflict, not a server
    /// fault).
    #[must_use]
    pub const fn is_unique_violation(&self) -> bool {
        matches!(self, Self::UniqueViolation { .. })
    }
}

/// Translate a raw sqlx error, surfacing unique-key collisions distinctly so
/// callers can map them to a conflict instead of a generic server error.
pub(crate) fn map_write_error(
    operation: &'static str,
    detail: &str,
    source: sqlx::Error,
) -> DataError {
    let is_unique = source
        .as_database_error()
        .is_some_and(|db| db.is_unique_violation());
    if is_unique {
        DataError::UniqueViolation {
            detail: detail.to_string(),
        }
    } else {
        DataError::query(operation, source)
    }
}
