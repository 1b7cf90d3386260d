//! Convenient re-exports for common use.

pub use crate::{PgConfig, PgConnection, PgConnector, PgError, PgResult, PgSslMode};
