use std::fmt;
use std::time::Instant;

use async_trait::async_trait;
use derive_more::{Deref, DerefMut};
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl, SimpleAsyncConnection};
use txprobe_core::{BoxedError, Connection, Connector, Rows};

use crate::{PgConfig, PgError, PgResult, TRACING_TARGET_CONNECTION, TRACING_TARGET_QUERY};

/// Opens [`AsyncPgConnection`]s for the pool.
///
/// The URL is assembled once from [`PgConfig`]; every handshake reuses it.
pub struct PgConnector {
    config: PgConfig,
    database_url: String,
}

impl PgConnector {
    /// Creates a connector without the rest of the configuration checks.
    ///
    /// Prefer [`PgConfig::build`], which validates first.
    ///
    /// # Errors
    ///
    /// Returns [`PgError::Config`] if no URL can be assembled from `config`.
    pub fn new(config: PgConfig) -> PgResult<Self> {
        let database_url = config.database_url()?.into();
        Ok(Self {
            config,
            database_url,
        })
    }

    /// Returns the configuration this connector was built from.
    #[inline]
    pub fn config(&self) -> &PgConfig {
        &self.config
    }

    /// Performs a handshake outside any pool.
    #[tracing::instrument(skip(self), target = TRACING_TARGET_CONNECTION)]
    pub async fn establish(&self) -> PgResult<PgConnection> {
        let start = Instant::now();
        let conn = AsyncPgConnection::establish(&self.database_url)
            .await
            .map_err(|error| {
                tracing::error!(
                    target: TRACING_TARGET_CONNECTION,
                    database_url = %self.config.database_url_masked(),
                    error = %error,
                    "Failed to connect to database"
                );
                PgError::from(error)
            })?;

        tracing::debug!(
            target: TRACING_TARGET_CONNECTION,
            database_url = %self.config.database_url_masked(),
            elapsed_ms = start.elapsed().as_millis(),
            "Connected to database"
        );

        Ok(PgConnection {
            inner: conn,
            closed: false,
        })
    }
}

impl fmt::Debug for PgConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PgConnector")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Connector for PgConnector {
    type Connection = PgConnection;

    async fn connect(&self) -> Result<Self::Connection, BoxedError> {
        Ok(self.establish().await?)
    }
}

/// A PostgreSQL connection leased through the pool.
///
/// Dereferences to the underlying [`AsyncPgConnection`] for callers that
/// want to run typed diesel queries on a leased connection.
#[derive(Deref, DerefMut)]
pub struct PgConnection {
    #[deref]
    #[deref_mut]
    inner: AsyncPgConnection,
    closed: bool,
}

impl PgConnection {
    /// Runs a control statement, remembering if the server hung up.
    async fn control(&mut self, statement: &'static str) -> Result<(), BoxedError> {
        let result = self.inner.batch_execute(statement).await;
        self.check(result).map_err(Into::into)
    }

    fn check<T>(&mut self, result: diesel::QueryResult<T>) -> PgResult<T> {
        result.map_err(|error| {
            let error = PgError::from(error);
            if error.is_connection_closed() {
                self.closed = true;
            }
            error
        })
    }
}

impl fmt::Debug for PgConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PgConnection")
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Connection for PgConnection {
    async fn execute(&mut self, statement: &str) -> Result<Rows, BoxedError> {
        let start = Instant::now();
        let result = diesel::sql_query(statement).execute(&mut self.inner).await;
        let count = self.check(result).inspect_err(|error| {
            tracing::warn!(
                target: TRACING_TARGET_QUERY,
                error = %error,
                "Statement failed"
            );
        })?;

        tracing::trace!(
            target: TRACING_TARGET_QUERY,
            rows = count,
            elapsed_ms = start.elapsed().as_millis(),
            "Statement executed"
        );
        Ok(Rows::new(count as u64))
    }

    async fn begin(&mut self) -> Result<(), BoxedError> {
        self.control("BEGIN").await
    }

    async fn commit(&mut self) -> Result<(), BoxedError> {
        self.control("COMMIT").await
    }

    async fn rollback(&mut self) -> Result<(), BoxedError> {
        self.control("ROLLBACK").await
    }

    async fn ping(&mut self) -> Result<(), BoxedError> {
        self.control("SELECT 1").await
    }

    fn is_valid(&self) -> bool {
        !self.closed
    }
}
