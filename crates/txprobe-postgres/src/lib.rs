#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![doc = include_str!("../README.md")]

// Tracing target constants for consistent logging.

/// Tracing target for database connection operations.
///
/// Use this target for logging connection establishment and connection errors.
pub const TRACING_TARGET_CONNECTION: &str = "txprobe_postgres::connection";

/// Tracing target for statement execution.
pub const TRACING_TARGET_QUERY: &str = "txprobe_postgres::queries";

mod client;
pub mod prelude;

use diesel::ConnectionError;
use diesel::result::{DatabaseErrorKind, Error};
pub use diesel_async::AsyncPgConnection;

pub use crate::client::{PgConfig, PgConnection, PgConnector, PgSslMode};

/// Error type for PostgreSQL connector operations.
#[derive(Debug, thiserror::Error)]
#[must_use = "database errors should be handled appropriately"]
pub enum PgError {
    /// Configuration error.
    ///
    /// Invalid connection parameters, detected before any handshake.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Failed to establish a database connection.
    ///
    /// This includes authentication failures, network issues, and invalid
    /// connection parameters.
    #[error("Database connection error: {0}")]
    Connection(#[from] ConnectionError),

    /// Database statement execution failed.
    #[error("Database query error: {0}")]
    Query(#[from] Error),
}

impl PgError {
    /// Returns whether the server closed the connection underneath us.
    pub fn is_connection_closed(&self) -> bool {
        matches!(
            self,
            PgError::Query(Error::DatabaseError(DatabaseErrorKind::ClosedConnection, _))
                | PgError::Connection(ConnectionError::BadConnection(_))
        )
    }

    /// Returns whether this error indicates a transient failure that might
    /// succeed on retry.
    pub fn is_transient(&self) -> bool {
        self.is_connection_closed()
            || matches!(
                self,
                PgError::Query(Error::DatabaseError(
                    DatabaseErrorKind::SerializationFailure,
                    _
                ))
            )
    }
}

impl From<PgError> for txprobe_core::Error {
    fn from(value: PgError) -> Self {
        match value {
            PgError::Config(message) => txprobe_core::Error::Config(message),
            other => txprobe_core::Error::Connect(Box::new(other)),
        }
    }
}

/// Specialized [`Result`] type for connector operations.
pub type PgResult<T, E = PgError> = Result<T, E>;
