//! Cost-aware batch scheduler for aggregation queries against a shared
//! warehouse table.
//!
//! A batch of queries is scored with a keyword [`Scorer`], the
//! [`select_runner`] policy picks one of three strategies, and the chosen
//! [`Runner`] executes the batch:
//!
//! - [`SequentialRunner`]: one session, queries in order.
//! - [`ParallelRunner`]: a bounded pool, one session per query.
//! - [`ServerSideRunner`]: the batch is loaded into a driver table and run
//!   by a generated stored procedure inside the warehouse.
//!
//! Every strategy can first materialise a filtered subset of the base table
//! so the queries scan less data.

#![warn(missing_docs)]

pub mod config;
pub mod cost;
pub mod error;
pub mod queries;
pub mod resources;
pub mod runner;
pub mod selector;
pub mod session_limit;
pub mod subset;
pub mod warehouse;

pub use config::{
    FailurePolicy, ParallelOptions, SchedulerConfig, SelectionThresholds, ServerSideOptions,
    SessionOptions, Teardown,
};
pub use cost::{estimate_cost, estimate_spool_risk, CostEstimate, KeywordScorer, Scorer};
pub use error::{BatchError, JobFailure, Result};
pub use queries::{parse_queries, read_queries};
pub use resources::{ResourceNames, ScopedResources};
pub use runner::{
    BatchRunner, ParallelRunner, RunOutput, Runner, RunnerKind, SequentialRunner,
    ServerSideRunner, Step, StepObserver, StepRecorder,
};
pub use selector::{build_runner, select_runner, select_strategy, BatchStats};
pub use session_limit::{ConfiguredSessionLimit, FixedSessionLimit, SessionLimitProbe};
pub use subset::{create_subset, SubsetManager, SubsetSpec};
pub use warehouse::{
    Dialect, ResultSet, Session, SqliteWarehouse, TeradataDialect, Value, Warehouse,
};
