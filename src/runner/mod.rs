//! The three interchangeable batch execution strategies.

mod parallel;
mod sequential;
mod server_side;

use std::fmt;

use serde::Serialize;

use crate::error::Result;
use crate::warehouse::{ResultSet, Warehouse};

pub use parallel::ParallelRunner;
pub use sequential::SequentialRunner;
pub use server_side::{ServerSideRunner, Step, StepObserver, StepRecorder};

/// Identifies an execution strategy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunnerKind {
    /// One session, queries in input order.
    Sequential,
    /// Bounded pool of sessions, one per query.
    Parallel,
    /// A single stored-procedure call inside the warehouse.
    ServerSide,
}

impl RunnerKind {
    /// Stable lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            RunnerKind::Sequential => "sequential",
            RunnerKind::Parallel => "parallel",
            RunnerKind::ServerSide => "server-side",
        }
    }
}

impl fmt::Display for RunnerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Value returned by a run.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", content = "results", rename_all = "kebab-case")]
pub enum RunOutput {
    /// One result set per query, in input order.
    PerQuery(Vec<ResultSet>),
    /// The combined output table of a server-side run.
    Combined(ResultSet),
}

impl RunOutput {
    /// Per-query result sets, if this is a per-query output.
    pub fn into_per_query(self) -> Option<Vec<ResultSet>> {
        match self {
            RunOutput::PerQuery(results) => Some(results),
            RunOutput::Combined(_) => None,
        }
    }

    /// The combined result set, if this is a server-side output.
    pub fn into_combined(self) -> Option<ResultSet> {
        match self {
            RunOutput::Combined(result) => Some(result),
            RunOutput::PerQuery(_) => None,
        }
    }

    /// Number of result sets carried.
    pub fn result_sets(&self) -> usize {
        match self {
            RunOutput::PerQuery(results) => results.len(),
            RunOutput::Combined(_) => 1,
        }
    }
}

/// A batch execution strategy.
pub trait Runner {
    /// Which strategy this is.
    fn kind(&self) -> RunnerKind;

    /// Runs `queries`, creating the subset table first when `materialise_subset` is set.
    fn run(&self, queries: &[String], materialise_subset: bool) -> Result<RunOutput>;
}

/// The runner chosen by [`crate::select_runner`].
pub enum BatchRunner<W: Warehouse> {
    /// Sequential strategy.
    Sequential(SequentialRunner<W>),
    /// Parallel strategy.
    Parallel(ParallelRunner<W>),
    /// Server-side strategy.
    ServerSide(ServerSideRunner<W>),
}

impl<W: Warehouse> Runner for BatchRunner<W> {
    fn kind(&self) -> RunnerKind {
        match self {
            BatchRunner::Sequential(runner) => runner.kind(),
            BatchRunner::Parallel(runner) => runner.kind(),
            BatchRunner::ServerSide(runner) => runner.kind(),
        }
    }

    fn run(&self, queries: &[String], materialise_subset: bool) -> Result<RunOutput> {
        match self {
            BatchRunner::Sequential(runner) => runner.run(queries, materialise_subset),
            BatchRunner::Parallel(runner) => runner.run(queries, materialise_subset),
            BatchRunner::ServerSide(runner) => runner.run(queries, materialise_subset),
        }
    }
}

impl<W: Warehouse> fmt::Debug for BatchRunner<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("BatchRunner").field(&self.kind()).finish()
    }
}
