use thiserror::Error;

/// Errors surfaced by warehouse backends.
#[derive(Debug, Error)]
pub enum WarehouseError {
    /// The connection is unusable (dropped, timed out, pool exhausted).
    #[error("connection error: {0}")]
    Connection(String),

    /// The statement reached the database and was rejected.
    #[error("database error: {0}")]
    Database(String),

    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("unknown table: {0}")]
    UnknownTable(String),

    #[error("statement not supported by this backend: {0}")]
    Unsupported(String),

    #[error("invalid identifier: {0:?}")]
    InvalidIdentifier(String),
}

impl WarehouseError {
    /// True when retrying on a fresh connection may succeed.
    pub fn is_connection(&self) -> bool {
        matches!(self, WarehouseError::Connection(_))
    }
}

impl From<sqlx::Error> for WarehouseError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Protocol(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => WarehouseError::Connection(e.to_string()),
            other => WarehouseError::Database(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_timeout_is_a_connection_error() {
        let err: WarehouseError = sqlx::Error::PoolTimedOut.into();
        assert!(err.is_connection());
        let err: WarehouseError = sqlx::Error::RowNotFound.into();
        assert!(!err.is_connection());
    }
}
