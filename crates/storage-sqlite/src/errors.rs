//! Storage-level errors and their mapping into the core error type.

use remindly_core::errors::{DatabaseError, Error};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Query failed: {0}")]
    Query(#[from] diesel::result::Error),

    #[error("Connection pool error: {0}")]
    Pool(#[from] diesel::r2d2::PoolError),

    #[error("Failed to open database: {0}")]
    Connection(#[from] diesel::ConnectionError),

    #[error("Migration failed: {0}")]
    Migration(String),

    /// The writer thread is gone or dropped the reply.
    #[error("Database writer unavailable: {0}")]
    Writer(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<StorageError> for Error {
    fn from(err: StorageError) -> Self {
        let database = match err {
            StorageError::Query(err) => DatabaseError::QueryFailed(err.to_string()),
            StorageError::Pool(err) => DatabaseError::ConnectionFailed(err.to_string()),
            StorageError::Connection(err) => DatabaseError::ConnectionFailed(err.to_string()),
            StorageError::Migration(message) => DatabaseError::MigrationFailed(message),
            StorageError::Writer(message) => DatabaseError::Internal(message),
            StorageError::Io(err) => DatabaseError::Internal(err.to_string()),
        };
        Error::Database(database)
    }
}
