//! The seam between the pool and the external store.
//!
//! The pool treats the store as an opaque query executor: a [`Connector`]
//! performs the handshake that yields a [`Connection`], and a connection runs
//! statements and the transaction control statements. Drivers implement these
//! two traits; nothing in this crate depends on a particular database.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::BoxedError;

/// Opaque statement result.
///
/// Row mapping is outside the scope of the pool, so only the number of rows
/// the store reported for the statement is kept.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rows {
    count: u64,
}

impl Rows {
    /// Creates a result reporting `count` rows.
    pub fn new(count: u64) -> Self {
        Self { count }
    }

    /// Number of rows returned or affected.
    #[inline]
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Returns `true` if the statement produced no rows.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

/// A live connection to the store.
///
/// A connection is only ever used by one task at a time; the pool guarantees
/// exclusive access while it is leased.
#[async_trait]
pub trait Connection: Send + 'static {
    /// Executes a single statement.
    async fn execute(&mut self, statement: &str) -> Result<Rows, BoxedError>;

    /// Opens a transaction on this connection.
    async fn begin(&mut self) -> Result<(), BoxedError>;

    /// Commits the open transaction.
    async fn commit(&mut self) -> Result<(), BoxedError>;

    /// Rolls back the open transaction.
    async fn rollback(&mut self) -> Result<(), BoxedError>;

    /// Round-trips to the store to verify the connection is alive.
    async fn ping(&mut self) -> Result<(), BoxedError>;

    /// Cheap local check used before handing an idle connection out again.
    fn is_valid(&self) -> bool {
        true
    }
}

/// Establishes new connections to the store.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Connection type produced by this connector.
    type Connection: Connection;

    /// Performs the handshake with the store.
    ///
    /// This may be slow and may fail; failures surface from the pool as
    /// [`Error::Connect`](crate::Error::Connect).
    async fn connect(&self) -> Result<Self::Connection, BoxedError>;
}
