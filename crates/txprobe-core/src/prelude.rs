//! Convenient re-exports for common use.

pub use crate::connector::{Connection, Connector, Rows};
pub use crate::context::{CancelReason, Context};
pub use crate::error::{BoxedError, Error, ErrorKind, Result};
pub use crate::pool::{ConnectionPool, PoolConfig, PoolStats, PooledConnection};
pub use crate::session::{NestedAcquirePolicy, Session};
pub use crate::transaction::{Transaction, TxState};
