#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![doc = include_str!("../README.md")]

mod config;
mod scenario;
mod signal;

use std::process;

use anyhow::Context as _;
use txprobe_core::{ConnectionPool, Connector, Context};

use crate::config::{Backend, Cli};
use crate::scenario::Report;

// Tracing target constants
pub const TRACING_TARGET_STARTUP: &str = "txprobe_cli::startup";
pub const TRACING_TARGET_CONFIG: &str = "txprobe_cli::config";
pub const TRACING_TARGET_SCENARIO: &str = "txprobe_cli::scenario";
pub const TRACING_TARGET_SHUTDOWN: &str = "txprobe_cli::shutdown";

#[tokio::main]
async fn main() {
    let Err(error) = run().await else {
        tracing::info!(
            target: TRACING_TARGET_SHUTDOWN,
            "probe terminated successfully"
        );
        process::exit(0);
    };

    if tracing::enabled!(tracing::Level::ERROR) {
        tracing::error!(
            target: TRACING_TARGET_SHUTDOWN,
            error = %format!("{error:#}"),
            "probe terminated with error"
        );
    } else {
        eprintln!("Error: {error:#}");
    }

    process::exit(1);
}

/// Main application entry point.
async fn run() -> anyhow::Result<()> {
    let cli = Cli::init();

    Cli::init_tracing();
    cli.log();
    cli.validate()?;

    let ctx = Context::background().with_cancel();
    signal::cancel_on_shutdown(ctx.clone());

    match cli.backend {
        Backend::Postgres => {
            let connector = cli
                .postgres
                .clone()
                .build()
                .context("invalid database configuration")?;
            probe(&cli, connector, &ctx).await
        }
        #[cfg(feature = "mock")]
        Backend::Mock => {
            let connector = txprobe_core::mock::MockConnector::new(cli.mock.clone());
            probe(&cli, connector, &ctx).await
        }
    }
}

/// Connects, runs the configured probe and reports the result.
///
/// Failing to reach the store at startup is fatal.
async fn probe<C: Connector>(cli: &Cli, connector: C, ctx: &Context) -> anyhow::Result<()> {
    let pool = ConnectionPool::new(cli.pool.clone(), connector)
        .context("failed to create connection pool")?;

    pool.ping(ctx)
        .await
        .inspect_err(log_error)
        .context("failed to connect to database")?;
    tracing::info!(target: TRACING_TARGET_STARTUP, "Database reachable");

    let result = scenario::run(&pool, &cli.probe, ctx)
        .await
        .inspect_err(log_error);
    pool.close();

    let report = result.context("probe failed")?;
    log_report(&report);

    if cli.probe.json {
        let json = serde_json::to_string_pretty(&report).context("failed to serialize report")?;
        println!("{json}");
    }

    Ok(())
}

/// Logs a pool error with its kind and, when one applies, a hint.
fn log_error(error: &txprobe_core::Error) {
    tracing::error!(
        target: TRACING_TARGET_SCENARIO,
        kind = error.kind_str(),
        hint = error.hint().as_deref(),
        transient = error.is_transient(),
        error = %error,
        "Pool operation failed"
    );
}

fn log_report(report: &Report) {
    let stats = &report.stats;
    tracing::info!(
        target: TRACING_TARGET_SCENARIO,
        scenario = %report.scenario,
        outcome = %report.outcome,
        nested_wait = ?report.nested_wait,
        rows_after_commit = report.rows_after_commit,
        "Probe finished"
    );
    tracing::info!(
        target: TRACING_TARGET_SCENARIO,
        max_open = stats.max_open,
        open = stats.open,
        idle = stats.idle,
        in_use = stats.in_use,
        wait_count = stats.wait_count,
        wait_duration = ?stats.wait_duration,
        max_idle_closed = stats.max_idle_closed,
        max_lifetime_closed = stats.max_lifetime_closed,
        "Connection pool statistics"
    );
}
