//! Error types for pool, session and transaction operations.

use std::borrow::Cow;

use deadpool::managed::{PoolError, TimeoutType};
use strum::{AsRefStr, IntoStaticStr};

use crate::context::CancelReason;
use crate::transaction::TxState;

/// Type alias for boxed dynamic errors that can be sent across threads.
///
/// Store drivers report failures through this type; the pool never inspects
/// them beyond wrapping them into an [`Error`] variant.
pub type BoxedError = Box<dyn std::error::Error + Send + Sync>;

/// Type alias for Results with our custom Error type.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Categories of errors, used as a stable field in structured logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsRefStr, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    /// Invalid pool or connector configuration.
    Config,
    /// A physical connection could not be established.
    Connect,
    /// The caller stopped waiting for a connection.
    AcquireCanceled,
    /// The pool was closed.
    PoolClosed,
    /// A session tried to acquire while holding an open transaction.
    NestedAcquire,
    /// The store rejected `BEGIN`.
    Begin,
    /// The store rejected or failed a statement.
    Query,
    /// Operation on a transaction that already terminated.
    TransactionClosed,
    /// The store rejected `COMMIT`.
    Commit,
    /// The store rejected `ROLLBACK`.
    Rollback,
    /// Anything not covered above.
    Unexpected,
}

/// Error type for all pool, session and transaction operations.
#[derive(Debug, thiserror::Error)]
#[must_use = "pool errors should be handled appropriately"]
pub enum Error {
    /// Configuration error.
    ///
    /// Raised at construction time, before any connection is opened.
    #[error("configuration error: {0}")]
    Config(String),

    /// Failed to establish a physical connection to the store.
    ///
    /// Fatal at startup, recoverable per acquisition afterwards. A failed
    /// handshake never counts against the open-connection budget.
    #[error("connection error: {0}")]
    Connect(#[source] BoxedError),

    /// The caller's context fired while waiting for a connection.
    ///
    /// The waiter has been removed and pool state is untouched.
    #[error("connection acquisition canceled: {0}")]
    AcquireCanceled(CancelReason),

    /// The pool was closed before or while waiting.
    #[error("connection pool is closed")]
    PoolClosed,

    /// The session already holds an open transaction and the pool has no
    /// connection to spare, so this acquisition could only ever be satisfied
    /// by that transaction terminating.
    #[error(
        "session holds {open_transactions} open transaction(s) and the pool is saturated \
         ({open}/{max_open} connections in use)"
    )]
    NestedAcquire {
        open_transactions: usize,
        open: usize,
        max_open: usize,
    },

    /// The store rejected the statement opening a transaction.
    #[error("failed to begin transaction: {0}")]
    Begin(#[source] BoxedError),

    /// The store rejected or failed a statement.
    ///
    /// The connection has already been returned to the pool.
    #[error("query failed: {source}")]
    Query {
        statement: String,
        #[source]
        source: BoxedError,
    },

    /// Operation attempted on a transaction that is no longer usable.
    ///
    /// This is a contract violation by the caller and must not be retried.
    #[error("transaction is closed (state: {0})")]
    TransactionClosed(TxState),

    /// The store rejected the commit. The bound connection was released.
    #[error("failed to commit transaction: {0}")]
    Commit(#[source] BoxedError),

    /// The store rejected the rollback. The bound connection was released.
    #[error("failed to roll back transaction: {0}")]
    Rollback(#[source] BoxedError),

    /// Unexpected error occurred.
    #[error("unexpected error: {0}")]
    Unexpected(Cow<'static, str>),
}

impl Error {
    /// Creates a query error for the given statement.
    pub(crate) fn query(statement: &str, source: impl Into<BoxedError>) -> Self {
        Self::Query {
            statement: statement.to_owned(),
            source: source.into(),
        }
    }

    /// Returns the error kind.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(_) => ErrorKind::Config,
            Self::Connect(_) => ErrorKind::Connect,
            Self::AcquireCanceled(_) => ErrorKind::AcquireCanceled,
            Self::PoolClosed => ErrorKind::PoolClosed,
            Self::NestedAcquire { .. } => ErrorKind::NestedAcquire,
            Self::Begin(_) => ErrorKind::Begin,
            Self::Query { .. } => ErrorKind::Query,
            Self::TransactionClosed(_) => ErrorKind::TransactionClosed,
            Self::Commit(_) => ErrorKind::Commit,
            Self::Rollback(_) => ErrorKind::Rollback,
            Self::Unexpected(_) => ErrorKind::Unexpected,
        }
    }

    /// Returns the error kind as a string.
    pub fn kind_str(&self) -> &'static str {
        self.kind().into()
    }

    /// Returns whether this error indicates a transient failure that might
    /// succeed on retry.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Connect(_) | Self::AcquireCanceled(_) | Self::NestedAcquire { .. }
        )
    }

    /// Returns an actionable hint for this error, if one applies.
    pub fn hint(&self) -> Option<Cow<'static, str>> {
        let hint = match self {
            Self::Connect(_) => {
                "Unable to establish a database connection, check the connection parameters and database availability"
            }
            Self::AcquireCanceled(CancelReason::DeadlineExceeded) => {
                "Connection pool is exhausted; if the waiting code path also holds an open transaction it can never be served, commit that transaction first or raise max open connections"
            }
            Self::NestedAcquire { .. } => {
                "Never acquire a second connection from the same pool while holding an open transaction on the same control path"
            }
            Self::TransactionClosed(_) => {
                "The transaction already terminated; begin a new one instead of reusing the handle"
            }
            Self::Commit(_) => "The unit of work was not committed; retry it with a new transaction",
            _ => return None,
        };

        Some(Cow::Borrowed(hint))
    }
}

impl From<PoolError<BoxedError>> for Error {
    fn from(value: PoolError<BoxedError>) -> Self {
        match value {
            PoolError::Timeout(TimeoutType::Wait) => {
                Self::AcquireCanceled(CancelReason::DeadlineExceeded)
            }
            PoolError::Timeout(TimeoutType::Create) => {
                Self::Connect("connection handshake timed out".into())
            }
            PoolError::Timeout(TimeoutType::Recycle) => {
                Self::Unexpected("connection recycling timed out".into())
            }
            PoolError::Backend(error) => Self::Connect(error),
            PoolError::Closed => Self::PoolClosed,
            PoolError::NoRuntimeSpecified => {
                // The runtime is always configured when the pool is built.
                tracing::error!("No tokio runtime specified for connection pool");
                Self::Unexpected("no runtime specified".into())
            }
            PoolError::PostCreateHook(err) => {
                // Our hooks only log, so this should not happen.
                tracing::warn!("Unexpected post-create hook error: {}", err);
                Self::Unexpected(err.to_string().into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_names_are_snake_case() {
        let error = Error::AcquireCanceled(CancelReason::Canceled);
        assert_eq!(error.kind_str(), "acquire_canceled");
        assert_eq!(Error::PoolClosed.kind_str(), "pool_closed");
    }

    #[test]
    fn wait_timeout_maps_to_deadline() {
        let error = Error::from(PoolError::<BoxedError>::Timeout(TimeoutType::Wait));
        assert!(matches!(
            error,
            Error::AcquireCanceled(CancelReason::DeadlineExceeded)
        ));
        assert!(error.is_transient());
        assert!(error.hint().is_some());
    }

    #[test]
    fn backend_failure_is_connect_error() {
        let error = Error::from(PoolError::Backend(BoxedError::from("refused")));
        assert_eq!(error.kind(), ErrorKind::Connect);
        assert_eq!(error.to_string(), "connection error: refused");
    }

    #[test]
    fn transaction_closed_is_permanent() {
        let error = Error::TransactionClosed(TxState::Committed);
        assert!(!error.is_transient());
        assert_eq!(error.to_string(), "transaction is closed (state: committed)");
    }
}
