use std::time::Duration;

use clap::{Args, ValueEnum};
use serde::{Deserialize, Serialize};
use strum::Display;
use txprobe_core::{NestedAcquirePolicy, parse_millis};

/// Probe to run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Serialize, Deserialize, Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum Scenario {
    /// Query inside a transaction, then a session query before committing.
    #[default]
    QueryBeforeCommit,
    /// Begin a second transaction while the first is still open.
    TransactionWithinTransaction,
}

/// Probe selection and limits.
#[derive(Debug, Clone, PartialEq, Eq, Args, Serialize, Deserialize)]
#[must_use = "config does nothing unless you use it"]
pub struct ProbeConfig {
    /// Probe to run.
    #[arg(long, env = "TXPROBE_SCENARIO", value_enum, default_value_t = Scenario::QueryBeforeCommit)]
    pub scenario: Scenario,

    /// Statement issued by every step of the probe.
    #[arg(
        long,
        env = "TXPROBE_STATEMENT",
        default_value = "SELECT * FROM suppliers LIMIT 50 OFFSET 450"
    )]
    pub statement: String,

    /// How long the nested acquisition may wait before it is reported as
    /// starved.
    #[arg(
        long = "probe-timeout-ms",
        env = "TXPROBE_PROBE_TIMEOUT_MS",
        value_parser = parse_millis,
        default_value = "2000"
    )]
    pub probe_timeout: Duration,

    /// What a session does when it acquires while holding an open
    /// transaction on a saturated pool.
    #[arg(long, env = "TXPROBE_NESTED_POLICY", value_enum, default_value_t = NestedAcquirePolicy::Block)]
    #[serde(default)]
    pub nested_policy: NestedAcquirePolicy,

    /// Print the final report as JSON on stdout.
    #[arg(long, env = "TXPROBE_JSON", default_value_t = false)]
    #[serde(default)]
    pub json: bool,
}

// Configuration constants
const MIN_PROBE_TIMEOUT: Duration = Duration::from_millis(10);
const MAX_PROBE_TIMEOUT: Duration = Duration::from_secs(600);

impl ProbeConfig {
    /// Validates the probe configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.statement.trim().is_empty() {
            anyhow::bail!("statement cannot be empty");
        }

        if !(MIN_PROBE_TIMEOUT..=MAX_PROBE_TIMEOUT).contains(&self.probe_timeout) {
            anyhow::bail!(
                "probe timeout must be between {:?} and {:?}",
                MIN_PROBE_TIMEOUT,
                MAX_PROBE_TIMEOUT
            );
        }

        Ok(())
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            scenario: Scenario::default(),
            statement: "SELECT * FROM suppliers LIMIT 50 OFFSET 450".to_owned(),
            probe_timeout: Duration::from_secs(2),
            nested_policy: NestedAcquirePolicy::default(),
            json: false,
        }
    }
}
