//! Transactions holding one leased connection from `begin` to termination.

use std::fmt;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display};
use uuid::Uuid;

use crate::connector::{Connection, Connector, Rows};
use crate::context::Context;
use crate::pool::PooledConnection;
use crate::session::Session;
use crate::{Error, Result, TRACING_TARGET_TRANSACTION};

/// Lifecycle state of a [`Transaction`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsRefStr, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TxState {
    Open,
    Committed,
    RolledBack,
}

/// A unit of work bound to one exclusively leased connection.
///
/// Every statement issued through the transaction runs on the connection it
/// leased at `begin`; it never touches the pool again. The connection is
/// released exactly once, on commit, on rollback, or on drop.
///
/// Dropping an open transaction schedules a rollback on the current tokio
/// runtime and returns the connection once it completes. Without a runtime
/// the connection is closed instead.
pub struct Transaction<C: Connector> {
    id: Uuid,
    state: TxState,
    connection_id: u64,
    conn: Option<PooledConnection<C>>,
    session: Session<C>,
    started_at: Instant,
}

impl<C: Connector> Transaction<C> {
    pub(crate) fn new(conn: PooledConnection<C>, session: Session<C>) -> Self {
        let id = Uuid::now_v7();
        let connection_id = conn.id();
        tracing::debug!(
            target: TRACING_TARGET_TRANSACTION,
            tx_id = %id,
            session_id = %session.id(),
            connection_id,
            "Transaction started"
        );

        Self {
            id,
            state: TxState::Open,
            connection_id,
            conn: Some(conn),
            session,
            started_at: Instant::now(),
        }
    }

    #[inline]
    pub fn id(&self) -> Uuid {
        self.id
    }

    #[inline]
    pub fn state(&self) -> TxState {
        self.state
    }

    /// Identity of the physical connection this transaction leased.
    #[inline]
    pub fn connection_id(&self) -> u64 {
        self.connection_id
    }

    /// Returns `true` while statements can still be issued.
    ///
    /// A transaction whose commit failed is not open even though its state
    /// was never advanced: its connection is already gone.
    #[inline]
    pub fn is_open(&self) -> bool {
        self.state == TxState::Open && self.conn.is_some()
    }

    /// Runs a statement on the bound connection.
    ///
    /// If `ctx` fires while the statement runs, the store-side transaction is
    /// in an unknown state: the connection is closed and the transaction ends
    /// as rolled back.
    ///
    /// # Errors
    ///
    /// [`Error::TransactionClosed`] once the transaction terminated, or
    /// [`Error::Query`] if the statement fails.
    #[tracing::instrument(
        skip(self, ctx),
        fields(tx_id = %self.id),
        target = TRACING_TARGET_TRANSACTION
    )]
    pub async fn query(&mut self, ctx: &Context, statement: &str) -> Result<Rows> {
        let state = self.state;
        let conn = match self.conn.as_mut() {
            Some(conn) if state == TxState::Open => conn,
            _ => return Err(Error::TransactionClosed(state)),
        };

        match ctx.run(conn.connection_mut().execute(statement)).await {
            Ok(Ok(rows)) => Ok(rows),
            Ok(Err(error)) => Err(Error::query(statement, error)),
            Err(reason) => {
                tracing::warn!(
                    target: TRACING_TARGET_TRANSACTION,
                    tx_id = %self.id,
                    %reason,
                    "Statement abandoned inside transaction, closing its connection"
                );
                self.state = TxState::RolledBack;
                self.release(true);
                Err(Error::query(statement, reason))
            }
        }
    }

    /// Commits and releases the connection.
    ///
    /// Committing twice is a no-op. If the store rejects the commit the state
    /// stays as it was, the connection is closed and the unit of work must be
    /// retried with a new transaction.
    ///
    /// # Errors
    ///
    /// [`Error::Commit`] if the store rejects the commit, or
    /// [`Error::TransactionClosed`] if the transaction was rolled back or an
    /// earlier commit failed.
    #[tracing::instrument(skip(self), fields(tx_id = %self.id), target = TRACING_TARGET_TRANSACTION)]
    pub async fn commit(&mut self) -> Result<()> {
        match self.state {
            TxState::Committed => return Ok(()),
            TxState::RolledBack => return Err(Error::TransactionClosed(self.state)),
            TxState::Open => {}
        }

        let Some(conn) = self.conn.as_mut() else {
            return Err(Error::TransactionClosed(self.state));
        };

        match conn.connection_mut().commit().await {
            Ok(()) => {
                self.state = TxState::Committed;
                self.release(false);
                tracing::debug!(
                    target: TRACING_TARGET_TRANSACTION,
                    tx_id = %self.id,
                    elapsed = ?self.started_at.elapsed(),
                    "Transaction committed"
                );
                Ok(())
            }
            Err(error) => {
                self.release(true);
                tracing::error!(
                    target: TRACING_TARGET_TRANSACTION,
                    tx_id = %self.id,
                    error = %error,
                    "Commit rejected, connection closed"
                );
                Err(Error::Commit(error))
            }
        }
    }

    /// Rolls back and releases the connection.
    ///
    /// A no-op once the transaction is committed or rolled back. The
    /// connection is released on every path; if the store rejects the
    /// rollback it is closed rather than reused.
    ///
    /// # Errors
    ///
    /// [`Error::Rollback`] if the store rejects the rollback.
    #[tracing::instrument(skip(self), fields(tx_id = %self.id), target = TRACING_TARGET_TRANSACTION)]
    pub async fn rollback(&mut self) -> Result<()> {
        if self.state != TxState::Open {
            return Ok(());
        }

        self.state = TxState::RolledBack;
        let Some(conn) = self.conn.as_mut() else {
            // A failed commit already closed the connection.
            return Ok(());
        };

        let result = conn.connection_mut().rollback().await;
        self.release(result.is_err());

        match result {
            Ok(()) => {
                tracing::debug!(
                    target: TRACING_TARGET_TRANSACTION,
                    tx_id = %self.id,
                    elapsed = ?self.started_at.elapsed(),
                    "Transaction rolled back"
                );
                Ok(())
            }
            Err(error) => {
                tracing::warn!(
                    target: TRACING_TARGET_TRANSACTION,
                    tx_id = %self.id,
                    error = %error,
                    "Rollback rejected, connection closed"
                );
                Err(Error::Rollback(error))
            }
        }
    }

    /// Rolls back unless the transaction was committed.
    ///
    /// Meant for cleanup paths: safe to call after [`commit`](Self::commit)
    /// or any earlier termination, and never releases the connection twice.
    pub async fn rollback_unless_committed(&mut self) -> Result<()> {
        match self.state {
            TxState::Committed | TxState::RolledBack => Ok(()),
            TxState::Open => self.rollback().await,
        }
    }

    /// Gives the connection back to the pool, or closes it.
    fn release(&mut self, discard: bool) {
        if let Some(mut conn) = self.conn.take() {
            if discard {
                conn.discard();
            }
            drop(conn);
            self.session.transaction_finished();
        }
    }
}

impl<C: Connector> Drop for Transaction<C> {
    fn drop(&mut self) {
        let Some(mut conn) = self.conn.take() else {
            return;
        };
        self.session.transaction_finished();

        let tx_id = self.id;
        tracing::warn!(
            target: TRACING_TARGET_TRANSACTION,
            tx_id = %tx_id,
            state = %self.state,
            "Transaction dropped while open, rolling back"
        );

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(error) = conn.connection_mut().rollback().await {
                        tracing::warn!(
                            target: TRACING_TARGET_TRANSACTION,
                            tx_id = %tx_id,
                            error = %error,
                            "Rollback of dropped transaction failed, closing its connection"
                        );
                        conn.discard();
                    }
                });
            }
            Err(_) => {
                conn.discard();
            }
        }
    }
}

impl<C: Connector> fmt::Debug for Transaction<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("connection_id", &self.connection_id)
            .field("bound", &self.conn.is_some())
            .finish()
    }
}
