//! In-memory store for exercising the pool without a database.
//!
//! [`MockConnector`] hands out [`MockConnection`]s that accept any statement,
//! track whether a transaction is open, and can be told to fail or stall.
//! Counters on the connector record every handshake, close and control
//! statement so tests can assert on what the pool did.
//!
//! # Feature Flag
//!
//! This module is only available when the `test-utils` feature is enabled:
//!
//! ```toml
//! [dev-dependencies]
//! txprobe-core = { version = "...", features = ["test-utils"] }
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use std::time::Duration;
//! use txprobe_core::mock::{MockConfig, MockConnector};
//!
//! let connector = MockConnector::new(MockConfig {
//!     query_delay: Duration::from_millis(10),
//!     ..Default::default()
//! });
//! connector.fail_commit(true);
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
#[cfg(feature = "config")]
use clap::Args;
use serde::{Deserialize, Serialize};

use crate::connector::{Connection, Connector, Rows};
use crate::error::BoxedError;
#[cfg(feature = "config")]
use crate::pool::parse_millis;

/// Configuration for the mock store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "config", derive(Args))]
pub struct MockConfig {
    /// Simulated handshake latency.
    #[cfg_attr(
        feature = "config",
        arg(
            long = "mock-connect-delay-ms",
            env = "MOCK_CONNECT_DELAY_MS",
            value_parser = parse_millis,
            default_value = "0"
        )
    )]
    #[serde(default)]
    pub connect_delay: Duration,

    /// Simulated statement latency.
    #[cfg_attr(
        feature = "config",
        arg(
            long = "mock-query-delay-ms",
            env = "MOCK_QUERY_DELAY_MS",
            value_parser = parse_millis,
            default_value = "0"
        )
    )]
    #[serde(default)]
    pub query_delay: Duration,

    /// Number of rows every statement reports.
    #[cfg_attr(
        feature = "config",
        arg(long = "mock-rows", env = "MOCK_ROWS", default_value_t = 50)
    )]
    #[serde(default = "default_rows")]
    pub rows: u64,
}

fn default_rows() -> u64 {
    50
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            connect_delay: Duration::ZERO,
            query_delay: Duration::ZERO,
            rows: default_rows(),
        }
    }
}

#[derive(Debug, Default)]
struct MockState {
    config: Mutex<MockConfig>,
    failing_statement: Mutex<Option<String>>,
    statements: Mutex<Vec<String>>,

    fail_connect: AtomicBool,
    fail_begin: AtomicBool,
    fail_commit: AtomicBool,
    fail_rollback: AtomicBool,
    /// Connections with a serial below this are reported broken.
    broken_below: AtomicU64,

    next_serial: AtomicU64,
    connects: AtomicU64,
    closes: AtomicU64,
    begins: AtomicU64,
    commits: AtomicU64,
    rollbacks: AtomicU64,
    pings: AtomicU64,
}

impl MockState {
    fn config(&self) -> MockConfig {
        self.config
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Connector for the in-memory store.
///
/// Clones share configuration, failure toggles and counters.
#[derive(Debug, Clone, Default)]
pub struct MockConnector {
    state: Arc<MockState>,
}

impl MockConnector {
    /// Creates a connector with the given configuration.
    pub fn new(config: MockConfig) -> Self {
        let state = MockState {
            config: Mutex::new(config),
            ..Default::default()
        };
        Self {
            state: Arc::new(state),
        }
    }

    /// Changes the statement latency for connections opened before and after.
    pub fn set_query_delay(&self, delay: Duration) {
        self.state
            .config
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .query_delay = delay;
    }

    /// Makes every handshake fail.
    pub fn fail_connect(&self, fail: bool) {
        self.state.fail_connect.store(fail, Ordering::Release);
    }

    /// Makes every `BEGIN` fail.
    pub fn fail_begin(&self, fail: bool) {
        self.state.fail_begin.store(fail, Ordering::Release);
    }

    /// Makes every `COMMIT` fail.
    pub fn fail_commit(&self, fail: bool) {
        self.state.fail_commit.store(fail, Ordering::Release);
    }

    /// Makes every `ROLLBACK` fail.
    pub fn fail_rollback(&self, fail: bool) {
        self.state.fail_rollback.store(fail, Ordering::Release);
    }

    /// Makes the given statement fail wherever it runs.
    pub fn fail_statement(&self, statement: impl Into<String>) {
        *self
            .state
            .failing_statement
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(statement.into());
    }

    /// Marks every connection opened so far as broken.
    pub fn break_connections(&self) {
        let next = self.state.next_serial.load(Ordering::Acquire);
        self.state.broken_below.store(next, Ordering::Release);
    }

    /// Number of successful handshakes.
    pub fn connects(&self) -> u64 {
        self.state.connects.load(Ordering::Acquire)
    }

    /// Number of connections closed.
    pub fn closes(&self) -> u64 {
        self.state.closes.load(Ordering::Acquire)
    }

    /// Number of successful `BEGIN`s.
    pub fn begins(&self) -> u64 {
        self.state.begins.load(Ordering::Acquire)
    }

    /// Number of successful `COMMIT`s.
    pub fn commits(&self) -> u64 {
        self.state.commits.load(Ordering::Acquire)
    }

    /// Number of successful `ROLLBACK`s.
    pub fn rollbacks(&self) -> u64 {
        self.state.rollbacks.load(Ordering::Acquire)
    }

    /// Number of successful pings.
    pub fn pings(&self) -> u64 {
        self.state.pings.load(Ordering::Acquire)
    }

    /// Statements executed so far, in order.
    pub fn statements(&self) -> Vec<String> {
        self.state
            .statements
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl Connector for MockConnector {
    type Connection = MockConnection;

    async fn connect(&self) -> Result<Self::Connection, BoxedError> {
        let delay = self.state.config().connect_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if self.state.fail_connect.load(Ordering::Acquire) {
            return Err("mock: connection refused".into());
        }

        let serial = self.state.next_serial.fetch_add(1, Ordering::AcqRel);
        self.state.connects.fetch_add(1, Ordering::AcqRel);
        Ok(MockConnection {
            serial,
            in_transaction: false,
            state: Arc::clone(&self.state),
        })
    }
}

/// Connection to the in-memory store.
#[derive(Debug)]
pub struct MockConnection {
    serial: u64,
    in_transaction: bool,
    state: Arc<MockState>,
}

impl MockConnection {
    /// Returns whether a transaction is open on this connection.
    #[inline]
    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }
}

#[async_trait]
impl Connection for MockConnection {
    async fn execute(&mut self, statement: &str) -> Result<Rows, BoxedError> {
        let config = self.state.config();
        if !config.query_delay.is_zero() {
            tokio::time::sleep(config.query_delay).await;
        }

        let failing = self
            .state
            .failing_statement
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_deref()
            == Some(statement);
        if failing {
            return Err(format!("mock: statement rejected: {statement}").into());
        }

        self.state
            .statements
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(statement.to_owned());
        Ok(Rows::new(config.rows))
    }

    async fn begin(&mut self) -> Result<(), BoxedError> {
        if self.in_transaction {
            return Err("mock: transaction already in progress".into());
        }
        if self.state.fail_begin.load(Ordering::Acquire) {
            return Err("mock: begin rejected".into());
        }

        self.in_transaction = true;
        self.state.begins.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), BoxedError> {
        if !self.in_transaction {
            return Err("mock: no transaction in progress".into());
        }
        if self.state.fail_commit.load(Ordering::Acquire) {
            return Err("mock: commit rejected".into());
        }

        self.in_transaction = false;
        self.state.commits.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), BoxedError> {
        if !self.in_transaction {
            return Err("mock: no transaction in progress".into());
        }
        if self.state.fail_rollback.load(Ordering::Acquire) {
            return Err("mock: rollback rejected".into());
        }

        self.in_transaction = false;
        self.state.rollbacks.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    async fn ping(&mut self) -> Result<(), BoxedError> {
        self.state.pings.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    fn is_valid(&self) -> bool {
        !self.in_transaction && self.serial >= self.state.broken_below.load(Ordering::Acquire)
    }
}

impl Drop for MockConnection {
    fn drop(&mut self) {
        self.state.closes.fetch_add(1, Ordering::AcqRel);
    }
}
