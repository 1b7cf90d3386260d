//! Logical sessions bound to a [`ConnectionPool`].

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

#[cfg(feature = "config")]
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;

use crate::connector::{Connection, Connector, Rows};
use crate::context::Context;
use crate::pool::{ConnectionPool, PooledConnection};
use crate::transaction::Transaction;
use crate::{Error, Result, TRACING_TARGET_SESSION};

/// What a session does when it acquires a connection while one of its own
/// transactions is open and the pool has nothing to spare.
///
/// In that situation the acquisition can only be served by another
/// transaction terminating. If the caller is the one that would terminate it,
/// the wait never ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[derive(Serialize, Deserialize, AsRefStr, Display, EnumString)]
#[cfg_attr(feature = "config", derive(ValueEnum))]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum NestedAcquirePolicy {
    /// Log a warning and wait, bounded only by the caller's context and the
    /// pool's acquire timeout.
    #[default]
    Block,
    /// Fail immediately with [`Error::NestedAcquire`].
    FailFast,
}

/// Logical handle bound to a pool.
///
/// A session holds no connection between calls. Each [`query`](Self::query)
/// leases a connection for the duration of one statement, and each
/// [`begin`](Self::begin) leases one for the lifetime of the returned
/// [`Transaction`]. Clones share the same open-transaction bookkeeping.
pub struct Session<C: Connector> {
    inner: Arc<SessionInner<C>>,
}

struct SessionInner<C: Connector> {
    id: Uuid,
    pool: ConnectionPool<C>,
    policy: NestedAcquirePolicy,
    open_transactions: AtomicUsize,
}

impl<C: Connector> Session<C> {
    /// Creates a session with the default [`NestedAcquirePolicy`].
    pub fn new(pool: ConnectionPool<C>) -> Self {
        Self::with_policy(pool, NestedAcquirePolicy::default())
    }

    /// Creates a session with the given nested acquisition policy.
    pub fn with_policy(pool: ConnectionPool<C>, policy: NestedAcquirePolicy) -> Self {
        let id = Uuid::now_v7();
        tracing::debug!(target: TRACING_TARGET_SESSION, session_id = %id, %policy, "Session created");

        Self {
            inner: Arc::new(SessionInner {
                id,
                pool,
                policy,
                open_transactions: AtomicUsize::new(0),
            }),
        }
    }

    #[inline]
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    #[inline]
    pub fn pool(&self) -> &ConnectionPool<C> {
        &self.inner.pool
    }

    #[inline]
    pub fn policy(&self) -> NestedAcquirePolicy {
        self.inner.policy
    }

    /// Number of transactions begun by this session that still hold a
    /// connection.
    #[inline]
    pub fn open_transactions(&self) -> usize {
        self.inner.open_transactions.load(Ordering::Acquire)
    }

    /// Runs a single statement outside any transaction.
    ///
    /// A connection is acquired for the statement and released before this
    /// returns, on success and on failure alike.
    ///
    /// # Errors
    ///
    /// Acquisition errors from [`ConnectionPool::acquire`], or
    /// [`Error::Query`] if the statement fails or `ctx` fires while it runs.
    #[tracing::instrument(
        skip(self, ctx),
        fields(session_id = %self.inner.id),
        target = TRACING_TARGET_SESSION
    )]
    pub async fn query(&self, ctx: &Context, statement: &str) -> Result<Rows> {
        let mut conn = self.acquire(ctx).await?;
        let connection_id = conn.id();

        match ctx.run(conn.connection_mut().execute(statement)).await {
            Ok(Ok(rows)) => {
                tracing::debug!(
                    target: TRACING_TARGET_SESSION,
                    connection_id,
                    rows = rows.count(),
                    "Statement executed"
                );
                Ok(rows)
            }
            Ok(Err(error)) => {
                tracing::warn!(
                    target: TRACING_TARGET_SESSION,
                    connection_id,
                    error = %error,
                    "Statement failed"
                );
                Err(Error::query(statement, error))
            }
            Err(reason) => {
                // The store may still be running the statement.
                conn.discard();
                tracing::warn!(
                    target: TRACING_TARGET_SESSION,
                    connection_id,
                    %reason,
                    "Statement abandoned"
                );
                Err(Error::query(statement, reason))
            }
        }
    }

    /// Begins a transaction on a freshly leased connection.
    ///
    /// The connection stays bound to the returned [`Transaction`] until it
    /// commits, rolls back or is dropped. With `max_open_connections = 1`,
    /// calling this (or [`query`](Self::query)) while another transaction is
    /// open on the same control path waits forever unless `ctx` fires.
    ///
    /// # Errors
    ///
    /// Acquisition errors from [`ConnectionPool::acquire`], or
    /// [`Error::Begin`] if the store rejects `BEGIN`.
    #[tracing::instrument(
        skip(self, ctx),
        fields(session_id = %self.inner.id),
        target = TRACING_TARGET_SESSION
    )]
    pub async fn begin(&self, ctx: &Context) -> Result<Transaction<C>> {
        let mut conn = self.acquire(ctx).await?;

        let result = match ctx.run(conn.connection_mut().begin()).await {
            Ok(result) => result,
            Err(reason) => Err(reason.into()),
        };

        if let Err(error) = result {
            conn.discard();
            tracing::error!(
                target: TRACING_TARGET_SESSION,
                connection_id = conn.id(),
                error = %error,
                "Failed to begin transaction"
            );
            return Err(Error::Begin(error));
        }

        self.inner.open_transactions.fetch_add(1, Ordering::AcqRel);
        Ok(Transaction::new(conn, self.clone()))
    }

    /// Runs `f` inside a transaction.
    ///
    /// Commits when `f` returns `Ok` and rolls back when it returns `Err`. A
    /// rollback failure is logged and the error from `f` is returned.
    pub async fn transaction<T, F>(&self, ctx: &Context, f: F) -> Result<T>
    where
        F: AsyncFnOnce(&mut Transaction<C>) -> Result<T>,
    {
        let mut tx = self.begin(ctx).await?;

        match f(&mut tx).await {
            Ok(value) => {
                tx.commit().await?;
                Ok(value)
            }
            Err(error) => {
                if let Err(rollback_error) = tx.rollback().await {
                    tracing::warn!(
                        target: TRACING_TARGET_SESSION,
                        tx_id = %tx.id(),
                        error = %rollback_error,
                        "Rollback after failed unit of work also failed"
                    );
                }
                Err(error)
            }
        }
    }

    /// Leases a connection, applying the nested acquisition policy.
    async fn acquire(&self, ctx: &Context) -> Result<PooledConnection<C>> {
        let open_transactions = self.open_transactions();
        if open_transactions > 0 {
            let stats = self.inner.pool.stats();
            if stats.is_saturated() {
                match self.inner.policy {
                    NestedAcquirePolicy::FailFast => {
                        tracing::error!(
                            target: TRACING_TARGET_SESSION,
                            session_id = %self.inner.id,
                            open_transactions,
                            open = stats.open,
                            max_open = stats.max_open,
                            "Nested acquisition on a saturated pool refused"
                        );
                        return Err(Error::NestedAcquire {
                            open_transactions,
                            open: stats.open,
                            max_open: stats.max_open,
                        });
                    }
                    NestedAcquirePolicy::Block => {
                        tracing::warn!(
                            target: TRACING_TARGET_SESSION,
                            session_id = %self.inner.id,
                            open_transactions,
                            open = stats.open,
                            max_open = stats.max_open,
                            "Acquiring while holding an open transaction on a saturated pool, \
                             this waits until a transaction terminates"
                        );
                    }
                }
            }
        }

        self.inner.pool.acquire(ctx).await
    }

    /// Called once by a transaction when it gives up its connection.
    pub(crate) fn transaction_finished(&self) {
        self.inner.open_transactions.fetch_sub(1, Ordering::AcqRel);
    }
}

impl<C: Connector> Clone for Session<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: Connector> fmt::Debug for Session<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.inner.id)
            .field("policy", &self.inner.policy)
            .field("open_transactions", &self.open_transactions())
            .finish_non_exhaustive()
    }
}
