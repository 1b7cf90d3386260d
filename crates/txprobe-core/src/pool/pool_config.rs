//! Connection pool configuration.
//!
//! Provides the recognized pool options with validation against named bounds
//! and presets for the two situations the harness cares about.

use std::fmt;
use std::time::Duration;

#[cfg(feature = "config")]
use clap::Args;
use serde::{Deserialize, Serialize};

use crate::{Error, Result, TRACING_TARGET_POOL};

/// Pool sizing and lifetime configuration.
///
/// The command-line defaults reproduce the starvation the harness exists to
/// probe: a single open connection, two idle slots and a one second lifetime.
///
/// ## Example
///
/// ```rust
/// use std::time::Duration;
/// use txprobe_core::PoolConfig;
///
/// let config = PoolConfig::default()
///     .with_max_open_connections(2)
///     .with_connection_max_lifetime(Duration::from_secs(1));
/// assert!(config.validate().is_ok());
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "config", derive(Args))]
#[must_use = "pool configurations must be used to create connection pools"]
pub struct PoolConfig {
    /// Maximum number of open connections, idle or in use.
    #[cfg_attr(
        feature = "config",
        arg(
            long = "max-open-connections",
            env = "MAX_OPEN_CONNECTIONS",
            default_value_t = 1
        )
    )]
    pub max_open_connections: usize,

    /// Maximum number of connections kept warm in the idle set.
    ///
    /// Clamped to `max_open_connections` by the pool.
    #[cfg_attr(
        feature = "config",
        arg(
            long = "max-idle-connections",
            env = "MAX_IDLE_CONNECTIONS",
            default_value_t = 2
        )
    )]
    pub max_idle_connections: usize,

    /// Maximum age of a connection before it is recycled (zero: unlimited).
    #[cfg_attr(
        feature = "config",
        arg(
            long = "connection-max-lifetime-ms",
            env = "CONNECTION_MAX_LIFETIME_MS",
            value_parser = parse_millis,
            default_value = "1000"
        )
    )]
    pub connection_max_lifetime: Duration,

    /// Upper bound on any wait for a connection, applied even when the
    /// caller's context has no deadline.
    #[cfg_attr(
        feature = "config",
        arg(
            long = "acquire-timeout-ms",
            env = "ACQUIRE_TIMEOUT_MS",
            value_parser = parse_millis
        )
    )]
    #[serde(default)]
    pub acquire_timeout: Option<Duration>,

    /// Upper bound on the connection handshake.
    #[cfg_attr(
        feature = "config",
        arg(
            long = "connect-timeout-ms",
            env = "CONNECT_TIMEOUT_MS",
            value_parser = parse_millis
        )
    )]
    #[serde(default)]
    pub connect_timeout: Option<Duration>,
}

// Configuration constants
const MIN_OPEN_CONNECTIONS: usize = 1;
const MAX_OPEN_CONNECTIONS: usize = 1024;

const MAX_IDLE_CONNECTIONS: usize = 1024;

const MAX_LIFETIME: Duration = Duration::from_secs(24 * 60 * 60);

const MIN_ACQUIRE_TIMEOUT: Duration = Duration::from_millis(1);
const MAX_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(300);

const MIN_CONNECT_TIMEOUT: Duration = Duration::from_millis(100);
const MAX_CONNECT_TIMEOUT: Duration = Duration::from_secs(300);

/// Parses a command-line duration given in milliseconds.
#[cfg(feature = "config")]
#[cfg_attr(docsrs, doc(cfg(feature = "config")))]
pub fn parse_millis(value: &str) -> std::result::Result<Duration, std::num::ParseIntError> {
    value.parse().map(Duration::from_millis)
}

impl PoolConfig {
    /// One connection, two idle slots, one second lifetime. Nested
    /// acquisition starves under it.
    pub fn starved() -> Self {
        Self {
            max_open_connections: 1,
            max_idle_connections: 2,
            connection_max_lifetime: Duration::from_secs(1),
            acquire_timeout: None,
            connect_timeout: None,
        }
    }

    /// Sets the maximum number of open connections.
    #[tracing::instrument(skip(self), target = TRACING_TARGET_POOL)]
    pub fn with_max_open_connections(mut self, max_open: usize) -> Self {
        tracing::debug!(target: TRACING_TARGET_POOL, max_open, "Setting max open connections");
        self.max_open_connections = max_open;
        self
    }

    /// Sets the maximum number of idle connections.
    #[tracing::instrument(skip(self), target = TRACING_TARGET_POOL)]
    pub fn with_max_idle_connections(mut self, max_idle: usize) -> Self {
        tracing::debug!(target: TRACING_TARGET_POOL, max_idle, "Setting max idle connections");
        self.max_idle_connections = max_idle;
        self
    }

    /// Sets the maximum connection lifetime.
    #[tracing::instrument(skip(self), target = TRACING_TARGET_POOL)]
    pub fn with_connection_max_lifetime(mut self, lifetime: Duration) -> Self {
        tracing::debug!(target: TRACING_TARGET_POOL, ?lifetime, "Setting connection max lifetime");
        self.connection_max_lifetime = lifetime;
        self
    }

    /// Sets the acquisition timeout.
    #[tracing::instrument(skip(self), target = TRACING_TARGET_POOL)]
    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        tracing::debug!(target: TRACING_TARGET_POOL, ?timeout, "Setting acquire timeout");
        self.acquire_timeout = Some(timeout);
        self
    }

    /// Sets the connection handshake timeout.
    #[tracing::instrument(skip(self), target = TRACING_TARGET_POOL)]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        tracing::debug!(target: TRACING_TARGET_POOL, ?timeout, "Setting connect timeout");
        self.connect_timeout = Some(timeout);
        self
    }

    /// Max idle connections after clamping to max open connections.
    #[inline]
    pub fn effective_max_idle(&self) -> usize {
        self.max_idle_connections.min(self.max_open_connections)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<()> {
        if !(MIN_OPEN_CONNECTIONS..=MAX_OPEN_CONNECTIONS).contains(&self.max_open_connections) {
            return Err(Error::Config(format!(
                "max_open_connections must be between {} and {}",
                MIN_OPEN_CONNECTIONS, MAX_OPEN_CONNECTIONS
            )));
        }

        if self.max_idle_connections > MAX_IDLE_CONNECTIONS {
            return Err(Error::Config(format!(
                "max_idle_connections must not exceed {}",
                MAX_IDLE_CONNECTIONS
            )));
        }

        if self.max_idle_connections > self.max_open_connections {
            tracing::debug!(
                target: TRACING_TARGET_POOL,
                max_idle = self.max_idle_connections,
                max_open = self.max_open_connections,
                "max_idle_connections exceeds max_open_connections and will be clamped"
            );
        }

        if self.connection_max_lifetime > MAX_LIFETIME {
            return Err(Error::Config(format!(
                "connection_max_lifetime must not exceed {:?}",
                MAX_LIFETIME
            )));
        }

        if let Some(timeout) = self.acquire_timeout
            && !(MIN_ACQUIRE_TIMEOUT..=MAX_ACQUIRE_TIMEOUT).contains(&timeout)
        {
            return Err(Error::Config(format!(
                "acquire_timeout must be between {:?} and {:?}",
                MIN_ACQUIRE_TIMEOUT, MAX_ACQUIRE_TIMEOUT
            )));
        }

        if let Some(timeout) = self.connect_timeout
            && !(MIN_CONNECT_TIMEOUT..=MAX_CONNECT_TIMEOUT).contains(&timeout)
        {
            return Err(Error::Config(format!(
                "connect_timeout must be between {:?} and {:?}",
                MIN_CONNECT_TIMEOUT, MAX_CONNECT_TIMEOUT
            )));
        }

        Ok(())
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_open_connections: 10,
            max_idle_connections: 2,
            connection_max_lifetime: Duration::ZERO,
            acquire_timeout: None,
            connect_timeout: None,
        }
    }
}

impl fmt::Display for PoolConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PoolConfig(max_open: {}, max_idle: {}, max_lifetime: {:?}, acquire_timeout: {:?}, connect_timeout: {:?})",
            self.max_open_connections,
            self.max_idle_connections,
            self.connection_max_lifetime,
            self.acquire_timeout,
            self.connect_timeout
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starved_preset() {
        let config = PoolConfig::starved();
        assert_eq!(config.max_open_connections, 1);
        assert_eq!(config.max_idle_connections, 2);
        assert_eq!(config.effective_max_idle(), 1);
        assert_eq!(config.connection_max_lifetime, Duration::from_secs(1));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn builder_sets_fields() {
        let config = PoolConfig::default()
            .with_max_open_connections(4)
            .with_max_idle_connections(3)
            .with_acquire_timeout(Duration::from_millis(250))
            .with_connect_timeout(Duration::from_secs(5));

        assert_eq!(config.max_open_connections, 4);
        assert_eq!(config.effective_max_idle(), 3);
        assert_eq!(config.acquire_timeout, Some(Duration::from_millis(250)));
        assert_eq!(config.connect_timeout, Some(Duration::from_secs(5)));
    }

    #[test]
    fn validation() {
        assert!(PoolConfig::default().validate().is_ok());

        let zero_open = PoolConfig::default().with_max_open_connections(0);
        assert!(matches!(zero_open.validate(), Err(Error::Config(_))));

        let huge_idle = PoolConfig::default().with_max_idle_connections(4096);
        assert!(huge_idle.validate().is_err());

        let instant_connect = PoolConfig::default().with_connect_timeout(Duration::from_millis(1));
        assert!(instant_connect.validate().is_err());

        let zero_acquire = PoolConfig::default().with_acquire_timeout(Duration::ZERO);
        assert!(zero_acquire.validate().is_err());
    }

    #[test]
    fn serde_round_trip_keeps_optional_fields() {
        let config = PoolConfig::starved().with_acquire_timeout(Duration::from_millis(500));
        let json = serde_json::to_string(&config).unwrap();
        let parsed: PoolConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, config);
    }

    #[cfg(feature = "config")]
    #[test]
    fn millisecond_arguments() {
        assert_eq!(parse_millis("250").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_millis("0").unwrap(), Duration::ZERO);
        assert!(parse_millis("-1").is_err());
        assert!(parse_millis("1s").is_err());
    }
}
