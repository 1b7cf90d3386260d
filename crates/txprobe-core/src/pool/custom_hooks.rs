//! Includes all hooks registered with the [`deadpool`] pool.

use deadpool::managed::{HookResult, Metrics};

use super::manager::PhysicalConnection;
use crate::TRACING_TARGET_CONNECTION;
use crate::error::BoxedError;

/// Custom hook called after a new connection has been established.
///
/// See [`PoolBuilder`] for more details.
///
/// [`PoolBuilder`]: deadpool::managed::PoolBuilder
pub fn post_create<T>(conn: &mut PhysicalConnection<T>, metrics: &Metrics) -> HookResult<BoxedError> {
    tracing::debug!(
        target: TRACING_TARGET_CONNECTION,
        hook = "post_create",
        connection_id = conn.id(),
        created_at = ?metrics.created,
        "Connection added to pool"
    );

    // Note: should never return an error.
    Ok(())
}

/// Custom hook called after an idle connection passed recycling and is about
/// to be handed out again.
///
/// See [`PoolBuilder`] for more details.
///
/// [`PoolBuilder`]: deadpool::managed::PoolBuilder
pub fn post_recycle<T>(
    conn: &mut PhysicalConnection<T>,
    metrics: &Metrics,
) -> HookResult<BoxedError> {
    tracing::trace!(
        target: TRACING_TARGET_CONNECTION,
        hook = "post_recycle",
        connection_id = conn.id(),
        age = ?conn.age(),
        last_recycled = ?metrics.recycled,
        recycle_count = metrics.recycle_count,
        "Reusing idle connection"
    );

    // Note: should never return an error.
    Ok(())
}
