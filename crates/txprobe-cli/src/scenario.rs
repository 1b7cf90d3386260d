//! The two starvation probes.
//!
//! Both probes hold an open transaction and then ask the same session for a
//! second connection on the same control path. With one connection in the
//! pool that request can only be served by the transaction terminating, which
//! cannot happen while the request waits, so the probe bounds the wait with
//! `probe_timeout` and reports what happened.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use strum::Display;
use txprobe_core::{
    CancelReason, ConnectionPool, Connector, Context, Error, PoolStats, Session, Transaction,
};

use crate::TRACING_TARGET_SCENARIO;
use crate::config::{ProbeConfig, Scenario};

/// What happened to the nested acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Outcome {
    /// A connection was available; the nested step ran.
    Completed,
    /// No connection became available before the probe timeout.
    Starved,
    /// The session refused to wait (fail-fast policy).
    Refused,
}

/// Result of one probe run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub scenario: Scenario,
    pub outcome: Outcome,
    /// Time the nested acquisition spent before it completed or gave up.
    pub nested_wait: Duration,
    /// Rows returned by the statement once the outer transaction committed.
    pub rows_after_commit: u64,
    /// Pool statistics at the end of the probe.
    pub stats: PoolStats,
}

/// Runs the configured probe against `pool`.
///
/// # Errors
///
/// Any failure other than the nested acquisition timing out or being refused,
/// including `ctx` being cancelled.
pub async fn run<C: Connector>(
    pool: &ConnectionPool<C>,
    probe: &ProbeConfig,
    ctx: &Context,
) -> txprobe_core::Result<Report> {
    let session = Session::with_policy(pool.clone(), probe.nested_policy);

    tracing::info!(
        target: TRACING_TARGET_SCENARIO,
        scenario = %probe.scenario,
        session_id = %session.id(),
        "Running probe"
    );

    let mut outer = session.begin(ctx).await?;
    let rows = outer.query(ctx, &probe.statement).await?;
    tracing::info!(
        target: TRACING_TARGET_SCENARIO,
        tx_id = %outer.id(),
        rows = rows.count(),
        open = pool.stats().open,
        "Outer transaction queried"
    );

    let nested_ctx = ctx.with_timeout(probe.probe_timeout);
    let start = Instant::now();
    let result = match probe.scenario {
        Scenario::QueryBeforeCommit => session
            .query(&nested_ctx, &probe.statement)
            .await
            .map(|rows| rows.count()),
        Scenario::TransactionWithinTransaction => {
            nested_transaction(&session, &nested_ctx, &probe.statement).await
        }
    };
    let nested_wait = start.elapsed();

    let outcome = match classify(result, ctx) {
        Ok(outcome) => outcome,
        Err(error) => {
            rollback(&mut outer).await;
            return Err(error);
        }
    };

    log_outcome(outcome, nested_wait, pool.stats());

    outer.commit().await?;
    let rows_after_commit = session.query(ctx, &probe.statement).await?.count();
    tracing::info!(
        target: TRACING_TARGET_SCENARIO,
        rows = rows_after_commit,
        "Statement succeeded after the outer transaction committed"
    );

    Ok(Report {
        scenario: probe.scenario,
        outcome,
        nested_wait,
        rows_after_commit,
        stats: pool.stats(),
    })
}

async fn nested_transaction<C: Connector>(
    session: &Session<C>,
    ctx: &Context,
    statement: &str,
) -> txprobe_core::Result<u64> {
    let mut inner = session.begin(ctx).await?;
    let rows = inner.query(ctx, statement).await?;
    inner.commit().await?;
    Ok(rows.count())
}

/// Separates the expected starvation outcomes from real failures.
fn classify(result: txprobe_core::Result<u64>, ctx: &Context) -> txprobe_core::Result<Outcome> {
    match result {
        Ok(_) => Ok(Outcome::Completed),
        // The probe deadline fired, not the caller's.
        Err(Error::AcquireCanceled(CancelReason::DeadlineExceeded)) if ctx.err().is_none() => {
            Ok(Outcome::Starved)
        }
        Err(Error::NestedAcquire { .. }) => Ok(Outcome::Refused),
        Err(error) => Err(error),
    }
}

async fn rollback<C: Connector>(tx: &mut Transaction<C>) {
    if let Err(error) = tx.rollback_unless_committed().await {
        tracing::warn!(
            target: TRACING_TARGET_SCENARIO,
            tx_id = %tx.id(),
            error = %error,
            "Failed to roll back outer transaction"
        );
    }
}

fn log_outcome(outcome: Outcome, waited: Duration, stats: PoolStats) {
    match outcome {
        Outcome::Completed => tracing::info!(
            target: TRACING_TARGET_SCENARIO,
            %outcome,
            ?waited,
            open = stats.open,
            max_open = stats.max_open,
            "Nested acquisition completed while the outer transaction was open"
        ),
        Outcome::Starved => tracing::warn!(
            target: TRACING_TARGET_SCENARIO,
            %outcome,
            ?waited,
            open = stats.open,
            max_open = stats.max_open,
            in_use = stats.in_use,
            "Nested acquisition starved: the only connection is held by the open transaction \
             on the same control path"
        ),
        Outcome::Refused => tracing::warn!(
            target: TRACING_TARGET_SCENARIO,
            %outcome,
            open = stats.open,
            max_open = stats.max_open,
            "Nested acquisition refused by the fail-fast policy"
        ),
    }
}

#[cfg(test)]
mod tests {
    use txprobe_core::mock::MockConnector;
    use txprobe_core::{NestedAcquirePolicy, PoolConfig};

    use super::*;

    fn probe(scenario: Scenario) -> ProbeConfig {
        ProbeConfig {
            scenario,
            probe_timeout: Duration::from_millis(50),
            ..Default::default()
        }
    }

    fn pool(max_open: usize) -> (ConnectionPool<MockConnector>, MockConnector) {
        let connector = MockConnector::default();
        let config = PoolConfig::starved().with_max_open_connections(max_open);
        let pool = ConnectionPool::new(config, connector.clone()).unwrap();
        (pool, connector)
    }

    #[tokio::test]
    async fn query_before_commit_starves_single_connection() {
        let (pool, connector) = pool(1);
        let report = run(&pool, &probe(Scenario::QueryBeforeCommit), &Context::background())
            .await
            .unwrap();

        assert_eq!(report.outcome, Outcome::Starved);
        assert!(report.nested_wait >= Duration::from_millis(50));
        assert_eq!(report.rows_after_commit, 50);
        assert_eq!(report.stats.open, 1);
        assert_eq!(report.stats.in_use, 0);
        assert_eq!(connector.commits(), 1);
    }

    #[tokio::test]
    async fn query_before_commit_completes_with_spare_connection() {
        let (pool, _) = pool(2);
        let report = run(&pool, &probe(Scenario::QueryBeforeCommit), &Context::background())
            .await
            .unwrap();

        assert_eq!(report.outcome, Outcome::Completed);
        assert!(report.stats.open <= 2);
    }

    #[tokio::test]
    async fn transaction_within_transaction_starves_single_connection() {
        let (pool, connector) = pool(1);
        let report = run(
            &pool,
            &probe(Scenario::TransactionWithinTransaction),
            &Context::background(),
        )
        .await
        .unwrap();

        assert_eq!(report.outcome, Outcome::Starved);
        assert_eq!(connector.begins(), 1);
        assert_eq!(report.stats.waiting, 0);
    }

    #[tokio::test]
    async fn transaction_within_transaction_completes_with_spare_connection() {
        let (pool, connector) = pool(2);
        let report = run(
            &pool,
            &probe(Scenario::TransactionWithinTransaction),
            &Context::background(),
        )
        .await
        .unwrap();

        assert_eq!(report.outcome, Outcome::Completed);
        assert_eq!(connector.begins(), 2);
        assert_eq!(connector.commits(), 2);
    }

    #[tokio::test]
    async fn fail_fast_policy_refuses_instead_of_waiting() {
        let (pool, _) = pool(1);
        let probe = ProbeConfig {
            nested_policy: NestedAcquirePolicy::FailFast,
            ..probe(Scenario::QueryBeforeCommit)
        };

        let report = run(&pool, &probe, &Context::background()).await.unwrap();
        assert_eq!(report.outcome, Outcome::Refused);
        assert!(report.nested_wait < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn cancelled_caller_is_an_error() {
        let (pool, connector) = pool(1);
        let ctx = Context::background().with_cancel();
        ctx.cancel();

        let error = run(&pool, &probe(Scenario::QueryBeforeCommit), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(error, Error::AcquireCanceled(CancelReason::Canceled)));
        assert_eq!(connector.connects(), 0);
    }
}
