//! Benchmark error types.

use scylla::transport::errors::{NewSessionError, QueryError};
use thiserror::Error;

/// Benchmark errors.
#[derive(Debug, Error)]
pub enum Error {
    /// PostgreSQL driver error.
    #[error("postgres error: {0}")]
    Postgres(#[from] sqlx::Error),

    /// MongoDB driver error.
    #[error("mongodb error: {0}")]
    MongoDb(#[from] mongodb::error::Error),

    /// Cassandra query error.
    #[error("cassandra query error: {0}")]
    CassandraQuery(#[from] QueryError),

    /// Cassandra session could not be established.
    #[error("cassandra session error: {0}")]
    CassandraSession(#[from] NewSessionError),

    /// A stored row or document could not be mapped to the model.
    #[error("decode error: {0}")]
    Decode(String),

    /// Invalid configuration value.
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The report was requested before any operation succeeded.
    #[error("no results to report")]
    NoResults,
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Build a decode error from any displayable cause.
    pub fn decode(cause: impl std::fmt::Display) -> Self {
        Error::Decode(cause.to_string())
    }
}
