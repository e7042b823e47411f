//! Error types for the dedup store

use thiserror::Error;

/// Result type for store operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Storage failures.
///
/// A duplicate key is never reported here: `mark_processed` returns `Ok(false)`
/// for an already-recorded event.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Database operation failed (connection, query execution, etc.)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Embedded schema migrations could not be applied
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Storage location could not be prepared
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl StorageError {
    /// Check if error is transient (the same write may succeed on resubmission)
    pub fn is_transient(&self) -> bool {
        match self {
            StorageError::Database(sqlx_err) => is_transient_sqlx(sqlx_err),
            StorageError::Other(err) => err
                .downcast_ref::<sqlx::Error>()
                .map(is_transient_sqlx)
                .unwrap_or(false),
            _ => false,
        }
    }
}

fn is_transient_sqlx(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => true,
        // SQLITE_BUSY (5) / SQLITE_LOCKED (6)
        sqlx::Error::Database(db_err) => {
            matches!(db_err.code().as_deref(), Some("5") | Some("6"))
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_errors_are_transient() {
        assert!(StorageError::Database(sqlx::Error::PoolTimedOut).is_transient());
        assert!(StorageError::Database(sqlx::Error::PoolClosed).is_transient());
        assert!(StorageError::Other(anyhow::Error::new(sqlx::Error::PoolTimedOut)).is_transient());
    }

    #[test]
    fn test_row_not_found_is_not_transient() {
        assert!(!StorageError::Database(sqlx::Error::RowNotFound).is_transient());
        assert!(!StorageError::Other(anyhow::anyhow!("boom")).is_transient());
    }
}
