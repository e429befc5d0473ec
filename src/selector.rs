//! Picks an execution strategy for a whole batch.
//!
//! The policy is a pure function of [`BatchStats`] and
//! [`SelectionThresholds`]; only [`select_runner`] touches the session probe.

use serde::Serialize;
use tracing::info;

use crate::config::{SchedulerConfig, SelectionThresholds};
use crate::cost::{CostEstimate, Scorer};
use crate::runner::{BatchRunner, ParallelRunner, RunnerKind, SequentialRunner, ServerSideRunner};
use crate::session_limit::SessionLimitProbe;
use crate::subset::SubsetSpec;
use crate::warehouse::Warehouse;

/// Aggregate scores of a batch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct BatchStats {
    /// Highest per-query cost.
    pub max_cost: u32,
    /// Mean cost.
    pub avg_cost: f64,
    /// Highest per-query spool risk.
    pub max_spool_risk: u32,
    /// Mean spool risk.
    pub avg_spool_risk: f64,
    /// Number of queries.
    pub count: usize,
    /// Safe number of concurrent sessions.
    pub session_limit: usize,
}

impl BatchStats {
    /// Aggregates per-query estimates. An empty batch has all-zero scores.
    pub fn from_estimates(estimates: &[CostEstimate], session_limit: usize) -> Self {
        let count = estimates.len();
        let (mut max_cost, mut max_spool_risk) = (0, 0);
        let (mut total_cost, mut total_spool) = (0u64, 0u64);
        for estimate in estimates {
            max_cost = max_cost.max(estimate.cost);
            max_spool_risk = max_spool_risk.max(estimate.spool_risk);
            total_cost += u64::from(estimate.cost);
            total_spool += u64::from(estimate.spool_risk);
        }
        let mean = |total: u64| {
            if count == 0 {
                0.0
            } else {
                total as f64 / count as f64
            }
        };
        Self {
            max_cost,
            avg_cost: mean(total_cost),
            max_spool_risk,
            avg_spool_risk: mean(total_spool),
            count,
            session_limit: session_limit.max(1),
        }
    }

    /// Scores every query and aggregates the estimates.
    pub fn collect<Q: AsRef<str>>(
        queries: &[Q],
        scorer: &dyn Scorer,
        session_limit: usize,
    ) -> Self {
        let estimates: Vec<CostEstimate> = queries
            .iter()
            .map(|sql| scorer.estimate(sql.as_ref()))
            .collect();
        Self::from_estimates(&estimates, session_limit)
    }
}

/// Decision policy; the first matching rule wins.
///
/// 1. Sequential when every query is cheap and low-risk.
/// 2. Parallel when averages and the worst cost stay within the parallel
///    bounds and the batch fits a multiple of the session budget.
/// 3. Server-side otherwise.
pub fn select_strategy(stats: &BatchStats, thresholds: &SelectionThresholds) -> RunnerKind {
    if stats.max_cost <= thresholds.sequential_max_cost
        && stats.max_spool_risk <= thresholds.sequential_max_spool_risk
    {
        return RunnerKind::Sequential;
    }
    let session_budget = stats
        .session_limit
        .saturating_mul(thresholds.parallel_session_multiple);
    if stats.avg_cost <= thresholds.parallel_max_avg_cost
        && stats.avg_spool_risk <= thresholds.parallel_max_avg_spool_risk
        && stats.max_cost <= thresholds.parallel_max_cost
        && stats.count <= session_budget
    {
        return RunnerKind::Parallel;
    }
    RunnerKind::ServerSide
}

/// Builds the runner for an already chosen strategy.
pub fn build_runner<W: Warehouse>(
    kind: RunnerKind,
    warehouse: W,
    subset: SubsetSpec,
    config: &SchedulerConfig,
    probe: &dyn SessionLimitProbe,
) -> BatchRunner<W> {
    match kind {
        RunnerKind::Sequential => BatchRunner::Sequential(
            SequentialRunner::new(warehouse, subset).teardown(config.teardown),
        ),
        RunnerKind::Parallel => BatchRunner::Parallel(
            ParallelRunner::new(warehouse, subset, config.parallel.clone(), probe)
                .teardown(config.teardown),
        ),
        RunnerKind::ServerSide => BatchRunner::ServerSide(
            ServerSideRunner::new(warehouse, subset, config.server_side.clone())
                .teardown(config.teardown),
        ),
    }
}

/// Scores the batch and instantiates the matching runner. Never fails.
pub fn select_runner<W: Warehouse, Q: AsRef<str>>(
    warehouse: W,
    subset: SubsetSpec,
    queries: &[Q],
    config: &SchedulerConfig,
    probe: &dyn SessionLimitProbe,
    scorer: &dyn Scorer,
) -> BatchRunner<W> {
    let stats = BatchStats::collect(queries, scorer, probe.session_limit());
    let kind = select_strategy(&stats, &config.selection);
    info!(
        strategy = %kind,
        count = stats.count,
        max_cost = stats.max_cost,
        avg_cost = stats.avg_cost,
        avg_spool_risk = stats.avg_spool_risk,
        session_limit = stats.session_limit,
        "selector.decision"
    );
    build_runner(kind, warehouse, subset, config, probe)
}
