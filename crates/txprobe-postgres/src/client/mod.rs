//! Connection parameters and the diesel-async backed connector.

mod pg_config;
mod pg_connector;

pub use pg_config::{PgConfig, PgSslMode};
pub use pg_connector::{PgConnection, PgConnector};
