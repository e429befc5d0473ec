//! Error type shared by every part of the scheduler.

use std::io;
use std::path::PathBuf;

use thiserror::Error;
use tracing::error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, BatchError>;

/// A single failed job collected by a runner that reports every failure.
#[derive(Debug)]
pub struct JobFailure {
    /// 1-based position of the query in the submitted batch.
    pub job_id: usize,
    /// The error the query produced.
    pub error: BatchError,
}

/// Errors raised while scoring, scheduling or executing a batch.
#[derive(Debug, Error)]
pub enum BatchError {
    /// A submitted query does not reference the table the run requires.
    #[error("query {job_id} does not reference required table `{table}`: {query}")]
    Validation {
        /// 1-based position of the offending query.
        job_id: usize,
        /// The offending query text.
        query: String,
        /// The table every query must reference.
        table: String,
    },
    /// Error returned by the embedded SQLite driver.
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// Error reported by a warehouse backend that does not map to a driver type.
    #[error("warehouse: {0}")]
    Warehouse(String),
    /// A single query of the batch failed.
    #[error("query {job_id} failed: {source}")]
    Query {
        /// 1-based position of the failed query.
        job_id: usize,
        /// Underlying failure.
        #[source]
        source: Box<BatchError>,
    },
    /// Several queries failed and every failure was collected.
    #[error("{count} of the batch queries failed", count = .failures.len())]
    Batch {
        /// Failures in job order.
        failures: Vec<JobFailure>,
    },
    /// The configuration file could not be read.
    #[error("failed to read config {path}: {source}")]
    ConfigRead {
        /// Path of the configuration file.
        path: PathBuf,
        /// I/O failure.
        source: io::Error,
    },
    /// The configuration file is not valid TOML for [`crate::SchedulerConfig`].
    #[error("failed to parse config {path}: {source}")]
    ConfigParse {
        /// Path of the configuration file.
        path: PathBuf,
        /// Parse failure.
        source: toml::de::Error,
    },
    /// A configuration value is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// I/O error.
    #[error(transparent)]
    Io(#[from] io::Error),
    /// The backend cannot perform the requested operation.
    #[error("unsupported by backend: {0}")]
    Unsupported(&'static str),
    /// A parallel worker panicked before reporting its result.
    #[error("parallel worker panicked")]
    WorkerPanicked,
}

impl BatchError {
    pub(crate) fn query(job_id: usize, source: BatchError) -> Self {
        BatchError::Query {
            job_id,
            source: Box::new(source),
        }
    }

    /// Returns the 1-based job id the error is attributed to, if any.
    pub fn job_id(&self) -> Option<usize> {
        match self {
            BatchError::Validation { job_id, .. } | BatchError::Query { job_id, .. } => {
                Some(*job_id)
            }
            BatchError::Batch { failures } => failures.first().map(|f| f.job_id),
            _ => None,
        }
    }
}

pub(crate) fn worker_panicked() -> BatchError {
    error!("parallel worker panicked - aborting batch");
    BatchError::WorkerPanicked
}
