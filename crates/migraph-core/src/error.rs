//! Core error types.

use thiserror::Error;

/// Storage backend errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Embedded key-value store error.
    #[error("storage error: {0}")]
    Sled(#[from] sled::Error),

    /// SQLite error.
    #[cfg(feature = "sqlite")]
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// PostgreSQL error.
    #[cfg(feature = "postgres")]
    #[error("postgres error: {0}")]
    Postgres(#[from] sqlx::Error),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Deserialization error.
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// Statement could not be understood by the backend.
    #[error("invalid statement: {0}")]
    InvalidStatement(String),

    /// Statement referenced a table the backend does not know.
    #[error("unknown table: {0}")]
    UnknownTable(String),

    /// Transaction error.
    #[error("transaction error: {0}")]
    Transaction(String),

    /// Stored data is malformed.
    #[error("invalid data: {0}")]
    InvalidData(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Deserialization(err.to_string())
    }
}
