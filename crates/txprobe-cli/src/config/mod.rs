//! CLI configuration management.
//!
//! This module defines the complete CLI configuration hierarchy:
//!
//! ```text
//! Cli
//! ├── backend: Backend          # postgres, or mock (feature-gated)
//! ├── pool: PoolConfig          # max open/idle, lifetime, timeouts
//! ├── postgres: PgConfig        # host, port, user, dbname, DB_PASSWORD
//! ├── probe: ProbeConfig        # scenario, statement, nested policy
//! └── mock: MockConfig          # simulated latencies (feature-gated)
//! ```
//!
//! All configuration can be provided via CLI arguments or environment variables.
//! Use `--help` to see all available options.
//!
//! # Example
//!
//! ```bash
//! # Reproduce the starvation against the local database
//! DB_PASSWORD=secret txprobe --scenario query-before-commit
//!
//! # Same probe with a spare connection: completes
//! txprobe --scenario transaction-within-transaction --max-open-connections 2
//! ```

mod probe;

use std::process;

use anyhow::Context;
use clap::{Parser, ValueEnum};
pub use probe::{ProbeConfig, Scenario};
use serde::{Deserialize, Serialize};
use strum::Display;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use txprobe_core::PoolConfig;
use txprobe_postgres::PgConfig;

use crate::{TRACING_TARGET_CONFIG, TRACING_TARGET_STARTUP};

/// Store the probes run against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Serialize, Deserialize, Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum Backend {
    /// PostgreSQL server described by the `--postgres-*` options.
    #[default]
    Postgres,
    /// In-memory store, no server required.
    #[cfg(feature = "mock")]
    Mock,
}

/// Complete CLI configuration.
///
/// Combines all configuration groups for the harness:
/// - [`PoolConfig`]: Connection pool sizing and timeouts
/// - [`PgConfig`]: PostgreSQL connection parameters
/// - [`ProbeConfig`]: Which probe to run and how long to let it starve
/// - `MockConfig`: In-memory store latencies (feature-gated)
#[derive(Debug, Clone, Parser, Serialize, Deserialize)]
#[command(name = "txprobe")]
#[command(about = "Connection pool starvation probe")]
#[command(version)]
pub struct Cli {
    /// Store to run the probes against.
    #[arg(long, env = "TXPROBE_BACKEND", value_enum, default_value_t = Backend::Postgres)]
    pub backend: Backend,

    /// Connection pool configuration.
    #[clap(flatten)]
    pub pool: PoolConfig,

    /// PostgreSQL connection parameters.
    #[clap(flatten)]
    pub postgres: PgConfig,

    /// Probe selection and limits.
    #[clap(flatten)]
    pub probe: ProbeConfig,

    /// In-memory store configuration.
    #[cfg(feature = "mock")]
    #[clap(flatten)]
    pub mock: txprobe_core::mock::MockConfig,
}

impl Cli {
    /// Loads environment variables from .env file (if enabled) and parses CLI arguments.
    ///
    /// This is the preferred way to initialize the CLI configuration as it ensures
    /// .env files are loaded before clap parses arguments, allowing environment
    /// variables from .env to be used as defaults.
    pub fn init() -> Self {
        Self::load_dotenv();
        Self::parse()
    }

    /// Loads environment variables from .env file if the dotenv feature is enabled.
    #[cfg(feature = "dotenv")]
    fn load_dotenv() {
        if let Err(err) = dotenvy::dotenv()
            && !err.not_found()
        {
            eprintln!("Warning: failed to load .env file: {err}");
        }
    }

    /// No-op when dotenv feature is disabled.
    #[cfg(not(feature = "dotenv"))]
    fn load_dotenv() {}

    /// Initializes tracing with environment-based filtering.
    pub fn init_tracing() {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    /// Validates all configuration values.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.pool
            .validate()
            .context("invalid connection pool configuration")?;
        self.probe
            .validate()
            .context("invalid probe configuration")?;

        if self.backend == Backend::Postgres {
            self.postgres
                .validate()
                .context("invalid database configuration")?;
        }

        Ok(())
    }

    /// Logs configuration (no sensitive information).
    pub fn log(&self) {
        Self::log_build_info();

        tracing::info!(
            target: TRACING_TARGET_CONFIG,
            backend = %self.backend,
            scenario = %self.probe.scenario,
            nested_policy = %self.probe.nested_policy,
            probe_timeout = ?self.probe.probe_timeout,
            "Probe configuration"
        );

        tracing::info!(
            target: TRACING_TARGET_CONFIG,
            max_open_connections = self.pool.max_open_connections,
            max_idle_connections = self.pool.max_idle_connections,
            connection_max_lifetime = ?self.pool.connection_max_lifetime,
            acquire_timeout = ?self.pool.acquire_timeout,
            connect_timeout = ?self.pool.connect_timeout,
            "Connection pool configuration"
        );

        if self.backend == Backend::Postgres {
            tracing::info!(
                target: TRACING_TARGET_CONFIG,
                database_url = %self.postgres.database_url_masked(),
                "Database configuration"
            );
        }
    }

    /// Logs build information at debug level.
    fn log_build_info() {
        tracing::debug!(
            target: TRACING_TARGET_STARTUP,
            version = env!("CARGO_PKG_VERSION"),
            pid = process::id(),
            arch = std::env::consts::ARCH,
            os = std::env::consts::OS,
            features = ?Self::enabled_features(),
            "Build information"
        );
    }

    /// Returns a list of enabled compile-time features.
    fn enabled_features() -> Vec<&'static str> {
        [
            cfg!(feature = "dotenv").then_some("dotenv"),
            cfg!(feature = "mock").then_some("mock"),
        ]
        .into_iter()
        .flatten()
        .collect()
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn command_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn defaults_reproduce_the_starved_pool() {
        let cli = Cli::try_parse_from(["txprobe", "--postgres-password", "secret"]).unwrap();
        assert_eq!(cli.backend, Backend::Postgres);
        assert_eq!(cli.pool, PoolConfig::starved());
        assert_eq!(cli.postgres.postgres_port, 54000);
        assert_eq!(cli.probe.scenario, Scenario::QueryBeforeCommit);
        assert!(cli.validate().is_ok());
    }

    #[test]
    fn flags_override_defaults() {
        let cli = Cli::try_parse_from([
            "txprobe",
            "--scenario",
            "transaction-within-transaction",
            "--max-open-connections",
            "2",
            "--acquire-timeout-ms",
            "250",
            "--nested-policy",
            "fail-fast",
            "--probe-timeout-ms",
            "750",
        ])
        .unwrap();

        assert_eq!(cli.probe.scenario, Scenario::TransactionWithinTransaction);
        assert_eq!(cli.pool.max_open_connections, 2);
        assert_eq!(
            cli.pool.acquire_timeout,
            Some(std::time::Duration::from_millis(250))
        );
        assert_eq!(
            cli.probe.nested_policy,
            txprobe_core::NestedAcquirePolicy::FailFast
        );
        assert_eq!(
            cli.probe.probe_timeout,
            std::time::Duration::from_millis(750)
        );
    }

    #[test]
    fn malformed_millisecond_flags_are_rejected() {
        assert!(Cli::try_parse_from(["txprobe", "--probe-timeout-ms", "2s"]).is_err());
        assert!(Cli::try_parse_from(["txprobe", "--acquire-timeout-ms", "-5"]).is_err());
    }

    #[test]
    fn invalid_pool_is_rejected() {
        let cli = Cli::try_parse_from(["txprobe", "--max-open-connections", "0"]).unwrap();
        assert!(cli.validate().is_err());
    }
}
