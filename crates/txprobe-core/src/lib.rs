#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![doc = include_str!("../README.md")]

// Tracing target constants for consistent logging.

/// Tracing target for pool operations.
///
/// Use this target for logging acquisition, release, resizing and shutdown.
pub const TRACING_TARGET_POOL: &str = "txprobe_core::pool";

/// Tracing target for physical connection lifecycle events.
///
/// Use this target for logging handshakes, recycling and closes.
pub const TRACING_TARGET_CONNECTION: &str = "txprobe_core::connection";

/// Tracing target for session operations.
pub const TRACING_TARGET_SESSION: &str = "txprobe_core::session";

/// Tracing target for transaction lifecycle events.
pub const TRACING_TARGET_TRANSACTION: &str = "txprobe_core::transaction";

mod connector;
mod context;
mod error;
mod pool;
mod session;
mod transaction;

#[cfg(any(test, feature = "test-utils"))]
#[cfg_attr(docsrs, doc(cfg(feature = "test-utils")))]
pub mod mock;
pub mod prelude;

pub use crate::connector::{Connection, Connector, Rows};
pub use crate::context::{CancelReason, Context};
pub use crate::error::{BoxedError, Error, ErrorKind, Result};
#[cfg(feature = "config")]
#[cfg_attr(docsrs, doc(cfg(feature = "config")))]
pub use crate::pool::parse_millis;
pub use crate::pool::{ConnectionPool, PhysicalConnection, PoolConfig, PoolStats, PooledConnection};
pub use crate::session::{NestedAcquirePolicy, Session};
pub use crate::transaction::{Transaction, TxState};
