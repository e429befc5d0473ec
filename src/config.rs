//! Scheduler configuration, loadable from TOML.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{BatchError, Result};
use crate::warehouse::{ColumnDef, ColumnType};

/// Thresholds of the strategy decision policy.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionThresholds {
    /// Highest per-query cost still handled sequentially.
    pub sequential_max_cost: u32,
    /// Highest per-query spool risk still handled sequentially.
    pub sequential_max_spool_risk: u32,
    /// Highest average cost handled in parallel.
    pub parallel_max_avg_cost: f64,
    /// Highest average spool risk handled in parallel.
    pub parallel_max_avg_spool_risk: f64,
    /// Highest single-query cost handled in parallel.
    pub parallel_max_cost: u32,
    /// Parallel runs accept at most `session_limit * parallel_session_multiple` queries.
    pub parallel_session_multiple: usize,
}

impl Default for SelectionThresholds {
    fn default() -> Self {
        Self {
            sequential_max_cost: 1,
            sequential_max_spool_risk: 0,
            parallel_max_avg_cost: 4.0,
            parallel_max_avg_spool_risk: 2.0,
            parallel_max_cost: 5,
            parallel_session_multiple: 2,
        }
    }
}

/// What a parallel run does when one of its queries fails.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Stop dispatching on the first failure and report it.
    #[default]
    FailFast,
    /// Run every query and report all failures together.
    CollectAll,
}

/// Options of the parallel runner.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParallelOptions {
    /// Upper bound on worker threads, further capped by the session limit.
    pub max_workers: usize,
    /// Failure handling.
    pub failure_policy: FailurePolicy,
}

impl Default for ParallelOptions {
    fn default() -> Self {
        Self {
            max_workers: 6,
            failure_policy: FailurePolicy::FailFast,
        }
    }
}

/// Session budget settings.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionOptions {
    /// Safe number of concurrent sessions; `None` uses the built-in default.
    pub limit: Option<usize>,
}

/// Which server-side objects a run drops when it ends.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Teardown {
    /// Leave every object in place. The driver table and procedure use their
    /// base names, so the next run replaces them.
    Keep,
    /// Drop the run-scoped driver table and procedure.
    #[default]
    RunScoped,
    /// Also drop the output table and a subset table created by the run.
    All,
}

/// Options of the server-side runner.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSideOptions {
    /// Base name of the driver table; each run appends a unique suffix unless
    /// teardown is `keep`.
    pub driver_table: String,
    /// Name of the output table the submitted statements insert into.
    pub output_table: String,
    /// Base name of the batch procedure; suffixed like the driver table.
    pub procedure: String,
    /// Columns of the output table.
    pub output_columns: Vec<ColumnDef>,
}

impl Default for ServerSideOptions {
    fn default() -> Self {
        Self {
            driver_table: "batch_driver".to_string(),
            output_table: "batch_output".to_string(),
            procedure: "batch_runner".to_string(),
            output_columns: default_output_columns(),
        }
    }
}

/// Default wide schema of the output table.
pub fn default_output_columns() -> Vec<ColumnDef> {
    vec![
        ColumnDef::new("job_id", ColumnType::Integer),
        ColumnDef::new("query_type", ColumnType::Varchar(64)),
        ColumnDef::new("table_kind", ColumnType::Varchar(64)),
        ColumnDef::new("table_name", ColumnType::Varchar(256)),
        ColumnDef::new("record_count", ColumnType::BigInt),
        ColumnDef::new("distinct_table_count", ColumnType::BigInt),
        ColumnDef::new("result_timestamp", ColumnType::Timestamp),
        ColumnDef::new("sequence_num", ColumnType::Integer),
        ColumnDef::new("status", ColumnType::Varchar(32)),
        ColumnDef::new("notes", ColumnType::Varchar(1024)),
    ]
}

/// Complete scheduler configuration.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Cleanup performed when a run ends.
    pub teardown: Teardown,
    /// Strategy decision thresholds.
    pub selection: SelectionThresholds,
    /// Parallel runner options.
    pub parallel: ParallelOptions,
    /// Session budget.
    pub sessions: SessionOptions,
    /// Server-side runner options.
    pub server_side: ServerSideOptions,
}

impl SchedulerConfig {
    /// Reads and validates a TOML configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| BatchError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        let config: SchedulerConfig =
            toml::from_str(&contents).map_err(|source| BatchError::ConfigParse {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        debug!(path = %path.display(), "config.loaded");
        Ok(config)
    }

    /// Loads the file at [`default_config_path`] if it exists, defaults otherwise.
    pub fn load_default() -> Result<Self> {
        match default_config_path() {
            Some(path) if path.exists() => Self::load(path),
            _ => Ok(Self::default()),
        }
    }

    /// Parses configuration from a TOML string.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: SchedulerConfig =
            toml::from_str(contents).map_err(|source| BatchError::ConfigParse {
                path: PathBuf::from("<inline>"),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects values the runners cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.parallel.max_workers == 0 {
            return Err(BatchError::InvalidConfig(
                "parallel.max_workers must be at least 1".into(),
            ));
        }
        if self.selection.parallel_session_multiple == 0 {
            return Err(BatchError::InvalidConfig(
                "selection.parallel_session_multiple must be at least 1".into(),
            ));
        }
        let server = &self.server_side;
        for (key, value) in [
            ("driver_table", &server.driver_table),
            ("output_table", &server.output_table),
            ("procedure", &server.procedure),
        ] {
            if value.trim().is_empty() {
                return Err(BatchError::InvalidConfig(format!(
                    "server_side.{key} must not be empty"
                )));
            }
        }
        if !server
            .output_columns
            .iter()
            .any(|col| col.name.eq_ignore_ascii_case("job_id"))
        {
            return Err(BatchError::InvalidConfig(
                "server_side.output_columns must include job_id".into(),
            ));
        }
        Ok(())
    }
}

/// `<config dir>/sqlbatch/config.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|base| base.join("sqlbatch").join("config.toml"))
}
