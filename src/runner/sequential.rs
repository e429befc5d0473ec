use std::time::Instant;

use tracing::{debug, info};

use super::{RunOutput, Runner, RunnerKind};
use crate::config::Teardown;
use crate::error::{BatchError, Result};
use crate::resources::{Scope, ScopedResources};
use crate::subset::{SubsetManager, SubsetSpec};
use crate::warehouse::{ServerObject, Session, Warehouse};

/// Runs every query in input order on a single session.
pub struct SequentialRunner<W> {
    warehouse: W,
    subset: SubsetManager,
    teardown: Teardown,
}

impl<W: Warehouse> SequentialRunner<W> {
    /// Creates a sequential runner.
    pub fn new(warehouse: W, subset: SubsetSpec) -> Self {
        Self {
            warehouse,
            subset: SubsetManager::new(subset),
            teardown: Teardown::default(),
        }
    }

    /// Sets the teardown policy for a subset this runner materialises.
    pub fn teardown(mut self, teardown: Teardown) -> Self {
        self.teardown = teardown;
        self
    }
}

impl<W: Warehouse> Runner for SequentialRunner<W> {
    fn kind(&self) -> RunnerKind {
        RunnerKind::Sequential
    }

    fn run(&self, queries: &[String], materialise_subset: bool) -> Result<RunOutput> {
        if queries.is_empty() && !materialise_subset {
            return Ok(RunOutput::PerQuery(Vec::new()));
        }
        let started = Instant::now();
        info!(
            strategy = "sequential",
            queries = queries.len(),
            materialise_subset,
            "run.start"
        );

        let mut session = self.warehouse.connect()?;
        let mut scoped = ScopedResources::new(&mut session, self.teardown);
        if materialise_subset {
            self.subset.create_subset(scoped.session())?;
            scoped.track(
                ServerObject::Table(self.subset.subset_table().to_string()),
                Scope::Shared,
            );
        }

        let mut results = Vec::with_capacity(queries.len());
        for (idx, sql) in queries.iter().enumerate() {
            let job_id = idx + 1;
            debug!(job_id, "sequential.query");
            let result = scoped
                .session()
                .query(sql)
                .map_err(|err| BatchError::query(job_id, err))?;
            results.push(result);
        }

        info!(
            strategy = "sequential",
            queries = queries.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "run.finish"
        );
        Ok(RunOutput::PerQuery(results))
    }
}
