//! Bounded connection pool.
//!
//! [`ConnectionPool`] wraps a [`deadpool`] managed pool and adds what the
//! session/transaction model needs on top of it: an idle-capacity cap applied
//! on release, max-lifetime eviction, cancellable acquisition through a
//! [`Context`], and the counters exposed by [`PoolStats`].
//!
//! # Nested acquisition
//!
//! The pool never shares a leased connection. Code that holds a connection
//! (for example through an open [`Transaction`]) and then acquires a second
//! one from the same pool on the same control path waits for a release that
//! can only happen after the wait returns. With `max_open_connections = 1`
//! that wait never ends unless the caller's context fires, so never hold an
//! exclusive connection while requesting another from the same pool on the
//! same control path.
//!
//! [`Transaction`]: crate::Transaction

mod custom_hooks;
mod manager;
mod pool_config;
mod pool_status;
mod pooled_connection;

use std::fmt;
use std::future::{Future, poll_fn};
use std::pin::pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use deadpool::managed::{Hook, Object, Pool, QueueMode};
pub use manager::PhysicalConnection;
pub use pool_config::PoolConfig;
#[cfg(feature = "config")]
pub use pool_config::parse_millis;
pub use pool_status::PoolStats;
pub use pooled_connection::PooledConnection;

use self::manager::{PoolManager, PoolShared};
use crate::connector::{Connection, Connector};
use crate::context::Context;
use crate::session::Session;
use crate::{Error, Result, TRACING_TARGET_CONNECTION, TRACING_TARGET_POOL};

/// Acquisitions slower than this are logged as a warning.
const SLOW_ACQUIRE_THRESHOLD: Duration = Duration::from_millis(100);

/// Bounded pool of physical connections to the store.
///
/// Cloning is cheap and yields another handle to the same pool.
pub struct ConnectionPool<C: Connector> {
    inner: Arc<PoolInner<C>>,
}

struct PoolInner<C: Connector> {
    pool: Pool<PoolManager<C>>,
    shared: Arc<PoolShared>,
    config: PoolConfig,
    /// Serializes the idle-cap decision with the hand-back to the idle set.
    release_lock: Mutex<()>,
}

impl<C: Connector> ConnectionPool<C> {
    /// Creates a pool; no connection is opened until the first acquisition.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the configuration is invalid.
    #[tracing::instrument(skip_all, target = TRACING_TARGET_POOL)]
    pub fn new(config: PoolConfig, connector: C) -> Result<Self> {
        config.validate()?;
        tracing::info!(target: TRACING_TARGET_POOL, %config, "Initializing connection pool");

        let shared = Arc::new(PoolShared::new(
            config.effective_max_idle(),
            config.connection_max_lifetime,
        ));
        let manager = PoolManager::new(connector, Arc::clone(&shared));

        let pool = Pool::builder(manager)
            .max_size(config.max_open_connections)
            .queue_mode(QueueMode::Lifo)
            .wait_timeout(config.acquire_timeout)
            .create_timeout(config.connect_timeout)
            .runtime(deadpool::Runtime::Tokio1)
            .post_create(Hook::sync_fn(custom_hooks::post_create::<C::Connection>))
            .post_recycle(Hook::sync_fn(custom_hooks::post_recycle::<C::Connection>))
            .build()
            .map_err(|e| {
                tracing::error!(target: TRACING_TARGET_POOL, error = %e, "Failed to create connection pool");
                Error::Unexpected(format!("failed to build connection pool: {}", e).into())
            })?;

        Ok(Self {
            inner: Arc::new(PoolInner {
                pool,
                shared,
                config,
                release_lock: Mutex::new(()),
            }),
        })
    }

    /// Creates a session bound to this pool.
    pub fn session(&self) -> Session<C> {
        Session::new(self.clone())
    }

    /// Leases a connection.
    ///
    /// Returns an idle connection if one exists, opens a new one while the
    /// pool is below capacity, and otherwise waits until a connection is
    /// released or evicted. This is the only call in the crate that suspends
    /// on the pool.
    ///
    /// # Errors
    ///
    /// - [`Error::AcquireCanceled`] if `ctx` is cancelled or its deadline (or
    ///   the configured acquire timeout) passes while waiting
    /// - [`Error::Connect`] if opening a new connection fails
    /// - [`Error::PoolClosed`] if the pool was closed
    #[tracing::instrument(skip_all, target = TRACING_TARGET_POOL)]
    pub async fn acquire(&self, ctx: &Context) -> Result<PooledConnection<C>> {
        let start = Instant::now();
        let counters = &self.inner.shared.counters;

        // Every acquirer that suspends counts as waiting, whatever it waits
        // for. Only waits on a saturated pool are recorded in the totals.
        let mut wait_guard = None;
        let mut saturated = false;
        let mut get = pin!(self.inner.pool.get());
        let checkout = poll_fn(|cx| {
            let poll = get.as_mut().poll(cx);
            if poll.is_pending() && wait_guard.is_none() {
                let stats = self.stats();
                saturated = stats.is_saturated();
                if saturated {
                    tracing::debug!(
                        target: TRACING_TARGET_POOL,
                        open = stats.open,
                        max_open = stats.max_open,
                        waiting = stats.waiting,
                        "All connections are leased, waiting for a release"
                    );
                }
                wait_guard = Some(counters.enter_wait());
            }
            poll
        });

        let result = ctx.run(checkout).await;
        let elapsed = start.elapsed();
        let waited = wait_guard.take().is_some() && saturated;

        let object = match result {
            Ok(Ok(object)) => object,
            Ok(Err(error)) => {
                let error = Error::from(error);
                tracing::warn!(
                    target: TRACING_TARGET_POOL,
                    error = %error,
                    elapsed = ?elapsed,
                    "Failed to acquire connection"
                );
                return Err(error);
            }
            Err(reason) => {
                tracing::warn!(
                    target: TRACING_TARGET_POOL,
                    reason = %reason,
                    elapsed = ?elapsed,
                    "Stopped waiting for a connection"
                );
                return Err(Error::AcquireCanceled(reason));
            }
        };

        if waited {
            counters.record_wait(elapsed);
        }

        if elapsed > SLOW_ACQUIRE_THRESHOLD {
            tracing::warn!(
                target: TRACING_TARGET_POOL,
                connection_id = object.id(),
                elapsed = ?elapsed,
                "Connection acquisition took longer than expected"
            );
        }

        counters.lease();
        tracing::debug!(
            target: TRACING_TARGET_POOL,
            connection_id = object.id(),
            elapsed = ?elapsed,
            "Connection acquired"
        );

        Ok(PooledConnection::new(object, self.clone()))
    }

    /// Releases a leased connection. Equivalent to dropping it.
    #[inline]
    pub fn release(&self, conn: PooledConnection<C>) {
        drop(conn);
    }

    /// Acquires a connection, checks it against the store and releases it.
    #[tracing::instrument(skip_all, target = TRACING_TARGET_POOL)]
    pub async fn ping(&self, ctx: &Context) -> Result<()> {
        let mut conn = self.acquire(ctx).await?;
        match ctx.run(conn.connection_mut().ping()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(error)) => {
                conn.discard();
                Err(Error::Connect(error))
            }
            Err(reason) => {
                conn.discard();
                Err(Error::Connect(Box::new(reason)))
            }
        }
    }

    /// Returns a snapshot of the pool statistics.
    pub fn stats(&self) -> PoolStats {
        let status = self.inner.pool.status();
        let shared = &self.inner.shared;

        let mut stats = PoolStats {
            max_open: status.max_size,
            max_idle: shared.max_idle(),
            open: status.size,
            ..Default::default()
        };
        shared.counters.fill(&mut stats);
        stats.idle = stats.open.saturating_sub(stats.in_use);
        stats
    }

    /// Changes the maximum number of open connections.
    ///
    /// Shrinking closes surplus idle connections now and surplus leased ones
    /// when they are released. Max idle is lowered to match if it exceeds the
    /// new limit.
    #[tracing::instrument(skip(self), target = TRACING_TARGET_POOL)]
    pub fn set_max_open(&self, max_open: usize) -> Result<()> {
        if max_open == 0 {
            return Err(Error::Config(
                "max_open_connections must be at least 1".to_owned(),
            ));
        }

        self.inner.pool.resize(max_open);
        if self.inner.shared.max_idle() > max_open {
            self.set_max_idle(max_open);
        }

        tracing::info!(target: TRACING_TARGET_POOL, max_open, "Max open connections changed");
        Ok(())
    }

    /// Changes the maximum number of idle connections, clamped to max open.
    /// Surplus idle connections are closed immediately.
    #[tracing::instrument(skip(self), target = TRACING_TARGET_POOL)]
    pub fn set_max_idle(&self, max_idle: usize) {
        let max_idle = max_idle.min(self.inner.pool.status().max_size);
        self.inner.shared.set_max_idle(max_idle);

        let kept = AtomicUsize::new(0);
        let removed = self
            .inner
            .pool
            .retain(|_, _| kept.fetch_add(1, Ordering::Relaxed) < max_idle)
            .removed;
        let closed = removed.len();
        for _ in &removed {
            self.inner.shared.counters.record_idle_closed();
        }
        drop(removed);

        tracing::info!(target: TRACING_TARGET_POOL, max_idle, closed, "Max idle connections changed");
    }

    /// Changes the maximum connection lifetime (zero: unlimited).
    ///
    /// Existing connections are checked lazily, when they are next acquired
    /// or released.
    #[tracing::instrument(skip(self), target = TRACING_TARGET_POOL)]
    pub fn set_max_lifetime(&self, lifetime: Duration) {
        self.inner.shared.set_max_lifetime(lifetime);
        tracing::info!(target: TRACING_TARGET_POOL, ?lifetime, "Connection max lifetime changed");
    }

    /// Closes the pool.
    ///
    /// Idle connections are closed, waiters fail with [`Error::PoolClosed`],
    /// and leased connections are closed when they are released.
    #[tracing::instrument(skip(self), target = TRACING_TARGET_POOL)]
    pub fn close(&self) {
        self.inner.pool.close();
        tracing::info!(target: TRACING_TARGET_POOL, "Connection pool closed");
    }

    /// Returns whether [`close`](Self::close) was called.
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.inner.pool.is_closed()
    }

    /// Returns the configuration the pool was created with.
    #[inline]
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Returns a leased object to the pool, or closes it.
    pub(crate) fn return_object(&self, object: Object<PoolManager<C>>, discard: bool) {
        let shared = &self.inner.shared;
        let _release = self
            .inner
            .release_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let stats = self.stats();
        let id = object.id();

        // The object being returned is still counted as in use.
        let idle_full = stats.waiting == 0 && stats.idle >= shared.max_idle();
        let expired = shared.is_expired(&object);
        let broken = !object.connection().is_valid();
        shared.counters.unlease();

        let reason = if discard {
            "discarded"
        } else if broken {
            "broken"
        } else if expired {
            shared.counters.record_lifetime_closed();
            "max_lifetime"
        } else if idle_full && !self.is_closed() {
            shared.counters.record_idle_closed();
            "max_idle"
        } else {
            tracing::debug!(target: TRACING_TARGET_POOL, connection_id = id, "Connection released");
            drop(object);
            return;
        };

        let conn = Object::take(object);
        tracing::debug!(
            target: TRACING_TARGET_CONNECTION,
            connection_id = id,
            reason,
            "Connection closed on release"
        );
        drop(conn);
    }
}

impl<C: Connector> Clone for ConnectionPool<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: Connector> fmt::Debug for ConnectionPool<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stats = self.stats();
        f.debug_struct("ConnectionPool")
            .field("max_open", &stats.max_open)
            .field("max_idle", &stats.max_idle)
            .field("open", &stats.open)
            .field("idle", &stats.idle)
            .field("waiting", &stats.waiting)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::context::CancelReason;
    use crate::mock::{MockConfig, MockConnector};

    fn pool(config: PoolConfig) -> (ConnectionPool<MockConnector>, MockConnector) {
        let connector = MockConnector::default();
        let pool = ConnectionPool::new(config, connector.clone()).unwrap();
        (pool, connector)
    }

    #[tokio::test]
    async fn connections_are_created_lazily() {
        let (pool, connector) = pool(PoolConfig::starved());
        assert_eq!(pool.stats().open, 0);
        assert_eq!(connector.connects(), 0);

        let conn = pool.acquire(&Context::background()).await.unwrap();
        let stats = pool.stats();
        assert_eq!(stats.open, 1);
        assert_eq!(stats.in_use, 1);
        assert_eq!(stats.idle, 0);
        drop(conn);

        let stats = pool.stats();
        assert_eq!(stats.open, 1);
        assert_eq!(stats.idle, 1);
        assert_eq!(stats.in_use, 0);
    }

    #[tokio::test]
    async fn release_then_acquire_reuses_connection() {
        let (pool, connector) = pool(PoolConfig::default().with_max_open_connections(3));
        let ctx = Context::background();

        let conn = pool.acquire(&ctx).await.unwrap();
        let id = conn.id();
        pool.release(conn);

        let again = pool.acquire(&ctx).await.unwrap();
        assert_eq!(again.id(), id);
        assert_eq!(connector.connects(), 1);
    }

    #[tokio::test]
    async fn most_recently_released_connection_is_reused_first() {
        let config = PoolConfig::default()
            .with_max_open_connections(3)
            .with_max_idle_connections(3);
        let (pool, connector) = pool(config);
        let ctx = Context::background();

        let a = pool.acquire(&ctx).await.unwrap();
        let b = pool.acquire(&ctx).await.unwrap();
        let a_id = a.id();
        drop(b);
        pool.release(a);
        assert_eq!(pool.stats().idle, 2);

        let again = pool.acquire(&ctx).await.unwrap();
        assert_eq!(again.id(), a_id);
        assert_eq!(connector.connects(), 2);
    }

    #[tokio::test]
    async fn open_count_never_exceeds_capacity() {
        let (pool, _) = pool(PoolConfig::default().with_max_open_connections(3));
        let ctx = Context::background();

        let mut tasks = Vec::new();
        for _ in 0..24 {
            let pool = pool.clone();
            let ctx = ctx.clone();
            tasks.push(tokio::spawn(async move {
                let conn = pool.acquire(&ctx).await.unwrap();
                assert!(pool.stats().open <= 3);
                tokio::time::sleep(Duration::from_millis(2)).await;
                drop(conn);
                assert!(pool.stats().open <= 3);
            }));
        }

        for task in tasks {
            task.await.unwrap();
        }

        let stats = pool.stats();
        assert!(stats.open <= 3);
        assert_eq!(stats.in_use, 0);
        assert_eq!(stats.waiting, 0);
    }

    #[tokio::test]
    async fn saturated_acquire_waits_for_release() {
        let (pool, _) = pool(PoolConfig::starved());
        let ctx = Context::background();
        let held = pool.acquire(&ctx).await.unwrap();
        let held_id = held.id();

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire(&Context::background()).await.map(|c| c.id()) })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());
        assert_eq!(pool.stats().waiting, 1);

        drop(held);
        let id = waiter.await.unwrap().unwrap();
        assert_eq!(id, held_id);

        let stats = pool.stats();
        assert_eq!(stats.open, 1);
        assert_eq!(stats.waiting, 0);
        assert_eq!(stats.wait_count, 1);
    }

    #[tokio::test]
    async fn waiter_arriving_during_connect_reuses_released_connection() {
        let connector = MockConnector::new(MockConfig {
            connect_delay: Duration::from_millis(40),
            ..Default::default()
        });
        let config = PoolConfig::starved().with_max_idle_connections(0);
        let pool = ConnectionPool::new(config, connector.clone()).unwrap();

        let first = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire(&Context::background()).await.map(|c| c.id()) })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        let second = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire(&Context::background()).await.map(|c| c.id()) })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(pool.stats().waiting, 2);

        let first = first.await.unwrap().unwrap();
        let second = second.await.unwrap().unwrap();
        assert_eq!(first, second);
        assert_eq!(connector.connects(), 1);
        assert_eq!(pool.stats().waiting, 0);
        assert_eq!(pool.stats().wait_count, 0);
    }

    #[tokio::test]
    async fn cancelled_waiter_leaves_pool_intact() {
        let (pool, _) = pool(PoolConfig::starved());
        let held = pool.acquire(&Context::background()).await.unwrap();

        let ctx = Context::background().with_cancel();
        let waiter = {
            let pool = pool.clone();
            let ctx = ctx.clone();
            tokio::spawn(async move { pool.acquire(&ctx).await.map(|c| c.id()) })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        ctx.cancel();

        let error = waiter.await.unwrap().unwrap_err();
        assert!(matches!(error, Error::AcquireCanceled(CancelReason::Canceled)));

        let stats = pool.stats();
        assert_eq!(stats.waiting, 0);
        assert_eq!(stats.open, 1);
        assert_eq!(stats.in_use, 1);

        drop(held);
        assert!(pool.acquire(&Context::background()).await.is_ok());
    }

    #[tokio::test]
    async fn deadline_fails_waiter() {
        let (pool, _) = pool(PoolConfig::starved());
        let _held = pool.acquire(&Context::background()).await.unwrap();

        let ctx = Context::background().with_timeout(Duration::from_millis(30));
        let error = pool.acquire(&ctx).await.unwrap_err();
        assert!(matches!(
            error,
            Error::AcquireCanceled(CancelReason::DeadlineExceeded)
        ));
    }

    #[tokio::test]
    async fn configured_acquire_timeout_bounds_background_waits() {
        let config = PoolConfig::starved().with_acquire_timeout(Duration::from_millis(30));
        let (pool, _) = pool(config);
        let _held = pool.acquire(&Context::background()).await.unwrap();

        let error = pool.acquire(&Context::background()).await.unwrap_err();
        assert!(matches!(
            error,
            Error::AcquireCanceled(CancelReason::DeadlineExceeded)
        ));
        assert_eq!(pool.stats().waiting, 0);
    }

    #[tokio::test]
    async fn connect_failure_does_not_consume_budget() {
        let (pool, connector) = pool(PoolConfig::starved());
        connector.fail_connect(true);

        let error = pool.acquire(&Context::background()).await.unwrap_err();
        assert!(matches!(error, Error::Connect(_)));
        assert_eq!(pool.stats().open, 0);

        connector.fail_connect(false);
        let conn = pool.acquire(&Context::background()).await.unwrap();
        assert_eq!(pool.stats().open, 1);
        drop(conn);
    }

    #[tokio::test]
    async fn excess_idle_connections_are_closed() {
        let config = PoolConfig::default()
            .with_max_open_connections(4)
            .with_max_idle_connections(1);
        let (pool, connector) = pool(config);
        let ctx = Context::background();

        let a = pool.acquire(&ctx).await.unwrap();
        let b = pool.acquire(&ctx).await.unwrap();
        let c = pool.acquire(&ctx).await.unwrap();
        drop(a);
        drop(b);
        drop(c);

        let stats = pool.stats();
        assert_eq!(stats.open, 1);
        assert_eq!(stats.idle, 1);
        assert_eq!(stats.max_idle_closed, 2);
        assert_eq!(connector.closes(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_releases_respect_idle_cap() {
        let config = PoolConfig::default()
            .with_max_open_connections(8)
            .with_max_idle_connections(1);
        let (pool, connector) = pool(config);
        let ctx = Context::background();

        let mut leases = Vec::new();
        for _ in 0..8 {
            leases.push(pool.acquire(&ctx).await.unwrap());
        }

        let barrier = Arc::new(tokio::sync::Barrier::new(leases.len()));
        let tasks: Vec<_> = leases
            .into_iter()
            .map(|conn| {
                let barrier = Arc::clone(&barrier);
                tokio::spawn(async move {
                    barrier.wait().await;
                    drop(conn);
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        let stats = pool.stats();
        assert_eq!(stats.open, 1);
        assert_eq!(stats.idle, 1);
        assert_eq!(stats.max_idle_closed, 7);
        assert_eq!(connector.closes(), 7);
    }

    #[tokio::test]
    async fn expired_connections_are_replaced() {
        let config = PoolConfig::default().with_connection_max_lifetime(Duration::from_millis(20));
        let (pool, connector) = pool(config);
        let ctx = Context::background();

        let conn = pool.acquire(&ctx).await.unwrap();
        let first = conn.id();
        drop(conn);

        tokio::time::sleep(Duration::from_millis(40)).await;
        let conn = pool.acquire(&ctx).await.unwrap();
        assert_ne!(conn.id(), first);
        assert_eq!(connector.connects(), 2);
        assert_eq!(pool.stats().max_lifetime_closed, 1);
        assert_eq!(pool.stats().open, 1);
    }

    #[tokio::test]
    async fn expired_lease_is_closed_on_release() {
        let (pool, connector) = pool(PoolConfig::default());
        let conn = pool.acquire(&Context::background()).await.unwrap();

        pool.set_max_lifetime(Duration::from_millis(1));
        tokio::time::sleep(Duration::from_millis(5)).await;
        drop(conn);

        assert_eq!(pool.stats().open, 0);
        assert_eq!(connector.closes(), 1);
    }

    #[tokio::test]
    async fn broken_idle_connection_is_replaced() {
        let (pool, connector) = pool(PoolConfig::default());
        let ctx = Context::background();

        let first = pool.acquire(&ctx).await.unwrap().id();
        connector.break_connections();

        let conn = pool.acquire(&ctx).await.unwrap();
        assert_ne!(conn.id(), first);
        assert_eq!(connector.connects(), 2);
        assert_eq!(connector.closes(), 1);
    }

    #[tokio::test]
    async fn discarded_lease_is_closed() {
        let (pool, connector) = pool(PoolConfig::default());
        let mut conn = pool.acquire(&Context::background()).await.unwrap();
        conn.discard();
        drop(conn);

        assert_eq!(pool.stats().open, 0);
        assert_eq!(connector.closes(), 1);
    }

    #[tokio::test]
    async fn set_max_idle_trims_idle_set() {
        let config = PoolConfig::default()
            .with_max_open_connections(4)
            .with_max_idle_connections(4);
        let (pool, connector) = pool(config);
        let ctx = Context::background();

        let leases = vec![
            pool.acquire(&ctx).await.unwrap(),
            pool.acquire(&ctx).await.unwrap(),
            pool.acquire(&ctx).await.unwrap(),
        ];
        drop(leases);
        assert_eq!(pool.stats().idle, 3);

        pool.set_max_idle(1);
        let stats = pool.stats();
        assert_eq!(stats.max_idle, 1);
        assert_eq!(stats.idle, 1);
        assert_eq!(connector.closes(), 2);
    }

    #[tokio::test]
    async fn set_max_open_lowers_max_idle() {
        let config = PoolConfig::default()
            .with_max_open_connections(4)
            .with_max_idle_connections(4);
        let (pool, _) = pool(config);

        pool.set_max_open(2).unwrap();
        let stats = pool.stats();
        assert_eq!(stats.max_open, 2);
        assert_eq!(stats.max_idle, 2);
        assert!(pool.set_max_open(0).is_err());
    }

    #[tokio::test]
    async fn set_max_open_unblocks_waiter() {
        let (pool, _) = pool(PoolConfig::starved());
        let _held = pool.acquire(&Context::background()).await.unwrap();

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire(&Context::background()).await.map(|c| c.id()) })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        pool.set_max_open(2).unwrap();
        assert!(waiter.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn close_fails_new_acquisitions() {
        let (pool, _) = pool(PoolConfig::default());
        let conn = pool.acquire(&Context::background()).await.unwrap();
        pool.close();
        assert!(pool.is_closed());

        let error = pool.acquire(&Context::background()).await.unwrap_err();
        assert!(matches!(error, Error::PoolClosed));
        drop(conn);
    }

    #[tokio::test]
    async fn close_fails_blocked_waiters() {
        let (pool, connector) = pool(PoolConfig::starved());
        let held = pool.acquire(&Context::background()).await.unwrap();

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire(&Context::background()).await.map(|c| c.id()) })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());
        assert_eq!(pool.stats().waiting, 1);

        pool.close();
        let error = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should fail promptly")
            .unwrap()
            .unwrap_err();
        assert!(matches!(error, Error::PoolClosed));
        assert_eq!(pool.stats().waiting, 0);

        drop(held);
        assert_eq!(connector.closes(), 1);
    }

    #[tokio::test]
    async fn ping_round_trips() {
        let (pool, connector) = pool(PoolConfig::default());
        pool.ping(&Context::background()).await.unwrap();
        assert_eq!(connector.pings(), 1);
        assert_eq!(pool.stats().idle, 1);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let result = ConnectionPool::new(
            PoolConfig::default().with_max_open_connections(0),
            MockConnector::default(),
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
