//! The [`deadpool`] manager that creates and recycles physical connections.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use deadpool::managed::{Manager, Metrics, RecycleError, RecycleResult};

use super::pool_status::PoolCounters;
use crate::connector::{Connection, Connector};
use crate::error::BoxedError;
use crate::TRACING_TARGET_CONNECTION;

/// A store connection owned by the pool.
///
/// Carries the identity and creation time the pool uses for lifetime
/// eviction; the store connection itself is reachable through
/// [`connection_mut`](Self::connection_mut).
pub struct PhysicalConnection<T> {
    id: u64,
    created_at: Instant,
    connection: T,
}

impl<T> PhysicalConnection<T> {
    fn new(id: u64, connection: T) -> Self {
        Self {
            id,
            created_at: Instant::now(),
            connection,
        }
    }

    /// Pool-assigned identity, unique within one pool.
    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// When the handshake completed.
    #[inline]
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Time since the handshake completed.
    #[inline]
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// The store connection.
    #[inline]
    pub fn connection(&self) -> &T {
        &self.connection
    }

    /// The store connection.
    #[inline]
    pub fn connection_mut(&mut self) -> &mut T {
        &mut self.connection
    }
}

impl<T> fmt::Debug for PhysicalConnection<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PhysicalConnection")
            .field("id", &self.id)
            .field("age", &self.age())
            .finish_non_exhaustive()
    }
}

/// State shared between the pool handle and its manager.
#[derive(Debug)]
pub(crate) struct PoolShared {
    max_idle: AtomicUsize,
    max_lifetime_ns: AtomicU64,
    pub counters: PoolCounters,
}

impl PoolShared {
    pub fn new(max_idle: usize, max_lifetime: Duration) -> Self {
        Self {
            max_idle: AtomicUsize::new(max_idle),
            max_lifetime_ns: AtomicU64::new(duration_to_nanos(max_lifetime)),
            counters: PoolCounters::default(),
        }
    }

    pub fn max_idle(&self) -> usize {
        self.max_idle.load(Ordering::Acquire)
    }

    pub fn set_max_idle(&self, max_idle: usize) {
        self.max_idle.store(max_idle, Ordering::Release);
    }

    /// Zero means connections never expire.
    pub fn max_lifetime(&self) -> Duration {
        Duration::from_nanos(self.max_lifetime_ns.load(Ordering::Acquire))
    }

    pub fn set_max_lifetime(&self, lifetime: Duration) {
        self.max_lifetime_ns
            .store(duration_to_nanos(lifetime), Ordering::Release);
    }

    pub fn is_expired<T>(&self, conn: &PhysicalConnection<T>) -> bool {
        let lifetime = self.max_lifetime();
        !lifetime.is_zero() && conn.age() >= lifetime
    }
}

fn duration_to_nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}

/// Creates connections through a [`Connector`] and decides on checkout
/// whether an idle connection may be handed out again.
pub(crate) struct PoolManager<C> {
    connector: C,
    shared: Arc<PoolShared>,
    next_id: AtomicU64,
}

impl<C: Connector> PoolManager<C> {
    pub fn new(connector: C, shared: Arc<PoolShared>) -> Self {
        Self {
            connector,
            shared,
            next_id: AtomicU64::new(1),
        }
    }
}

impl<C: Connector> Manager for PoolManager<C> {
    type Type = PhysicalConnection<C::Connection>;
    type Error = BoxedError;

    async fn create(&self) -> Result<Self::Type, Self::Error> {
        let start = Instant::now();
        let connection = self.connector.connect().await.inspect_err(|error| {
            tracing::error!(
                target: TRACING_TARGET_CONNECTION,
                elapsed_ms = start.elapsed().as_millis(),
                error = %error,
                "Failed to establish connection"
            );
        })?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        tracing::info!(
            target: TRACING_TARGET_CONNECTION,
            connection_id = id,
            elapsed_ms = start.elapsed().as_millis(),
            "Connection established"
        );

        Ok(PhysicalConnection::new(id, connection))
    }

    async fn recycle(&self, conn: &mut Self::Type, _: &Metrics) -> RecycleResult<Self::Error> {
        if self.shared.is_expired(conn) {
            self.shared.counters.record_lifetime_closed();
            tracing::debug!(
                target: TRACING_TARGET_CONNECTION,
                connection_id = conn.id(),
                age = ?conn.age(),
                "Idle connection outlived its max lifetime, replacing it"
            );
            return Err(RecycleError::Message(
                "connection exceeded its max lifetime".into(),
            ));
        }

        if !conn.connection().is_valid() {
            tracing::warn!(
                target: TRACING_TARGET_CONNECTION,
                connection_id = conn.id(),
                "Idle connection is broken, replacing it"
            );
            return Err(RecycleError::Message("connection is broken".into()));
        }

        Ok(())
    }
}
