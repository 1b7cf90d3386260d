use std::fmt;

use deadpool::managed::Object;

use super::ConnectionPool;
use super::manager::{PhysicalConnection, PoolManager};
use crate::connector::Connector;

/// A physical connection leased from a [`ConnectionPool`].
///
/// Dropping the lease releases the connection: it goes back to the idle set
/// or, when the idle set is full, the connection has expired, or the lease was
/// marked for discard, it is closed.
pub struct PooledConnection<C: Connector> {
    object: Option<Object<PoolManager<C>>>,
    pool: ConnectionPool<C>,
    discard: bool,
}

impl<C: Connector> PooledConnection<C> {
    pub(crate) fn new(object: Object<PoolManager<C>>, pool: ConnectionPool<C>) -> Self {
        Self {
            object: Some(object),
            pool,
            discard: false,
        }
    }

    fn physical(&self) -> &PhysicalConnection<C::Connection> {
        // Only `Drop` takes the object out.
        self.object.as_deref().expect("leased connection already released")
    }

    fn physical_mut(&mut self) -> &mut PhysicalConnection<C::Connection> {
        self.object
            .as_deref_mut()
            .expect("leased connection already released")
    }

    /// Pool-assigned identity of the physical connection.
    #[inline]
    pub fn id(&self) -> u64 {
        self.physical().id()
    }

    /// The store connection.
    #[inline]
    pub fn connection(&self) -> &C::Connection {
        self.physical().connection()
    }

    /// The store connection.
    #[inline]
    pub fn connection_mut(&mut self) -> &mut C::Connection {
        self.physical_mut().connection_mut()
    }

    /// Closes the connection on release instead of returning it to the idle
    /// set. Used when its protocol or transaction state is unknown.
    pub fn discard(&mut self) {
        self.discard = true;
    }

    /// Returns whether this lease will be closed on release.
    #[inline]
    pub fn is_discarded(&self) -> bool {
        self.discard
    }
}

impl<C: Connector> Drop for PooledConnection<C> {
    fn drop(&mut self) {
        if let Some(object) = self.object.take() {
            self.pool.return_object(object, self.discard);
        }
    }
}

impl<C: Connector> fmt::Debug for PooledConnection<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("connection", &self.object.as_deref())
            .field("discard", &self.discard)
            .finish()
    }
}
