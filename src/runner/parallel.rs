use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Sender};
use std::thread;
use std::time::Instant;

use tracing::{debug, info, warn};

use super::{RunOutput, Runner, RunnerKind};
use crate::config::{FailurePolicy, ParallelOptions, Teardown};
use crate::error::{worker_panicked, BatchError, JobFailure, Result};
use crate::resources::{Scope, ScopedResources};
use crate::session_limit::SessionLimitProbe;
use crate::subset::{SubsetManager, SubsetSpec};
use crate::warehouse::{ResultSet, ServerObject, Session, Warehouse};

type Outcome = (usize, Result<ResultSet>);

/// Runs queries on a bounded pool of worker threads, one session per query.
pub struct ParallelRunner<W> {
    warehouse: W,
    subset: SubsetManager,
    options: ParallelOptions,
    session_limit: usize,
    teardown: Teardown,
}

impl<W: Warehouse> ParallelRunner<W> {
    /// Creates a parallel runner whose pool is capped by `probe`.
    pub fn new(
        warehouse: W,
        subset: SubsetSpec,
        options: ParallelOptions,
        probe: &dyn SessionLimitProbe,
    ) -> Self {
        Self {
            warehouse,
            subset: SubsetManager::new(subset),
            options,
            session_limit: probe.session_limit().max(1),
            teardown: Teardown::default(),
        }
    }

    /// Sets the teardown policy for a subset this runner materialises.
    pub fn teardown(mut self, teardown: Teardown) -> Self {
        self.teardown = teardown;
        self
    }

    /// Worker threads used for a batch of `queries` queries.
    pub fn pool_size(&self, queries: usize) -> usize {
        self.options
            .max_workers
            .min(self.session_limit)
            .min(queries)
            .max(1)
    }

    fn dispatch(&self, queries: &[String]) -> Result<Vec<ResultSet>> {
        let total = queries.len();
        if total == 0 {
            return Ok(Vec::new());
        }
        let workers = self.pool_size(total);
        let next = AtomicUsize::new(0);
        let cancelled = AtomicBool::new(false);
        let (tx, rx) = mpsc::channel::<Outcome>();
        let mut slots: Vec<Option<ResultSet>> = (0..total).map(|_| None).collect();
        let mut failures: Vec<JobFailure> = Vec::new();

        debug!(workers, queries = total, "parallel.dispatch");
        let panicked = thread::scope(|scope| {
            let mut handles = Vec::with_capacity(workers);
            for worker in 0..workers {
                let tx = tx.clone();
                let next = &next;
                let cancelled = &cancelled;
                handles.push(
                    scope.spawn(move || self.worker_loop(worker, queries, next, cancelled, tx)),
                );
            }
            drop(tx);

            for (idx, outcome) in rx {
                match outcome {
                    Ok(result) => slots[idx] = Some(result),
                    Err(err) => {
                        let job_id = idx + 1;
                        if self.options.failure_policy == FailurePolicy::FailFast
                            && failures.is_empty()
                        {
                            warn!(job_id, error = %err, "parallel.cancel");
                        }
                        failures.push(JobFailure { job_id, error: err });
                    }
                }
            }

            handles
                .into_iter()
                .map(|handle| handle.join())
                .fold(false, |panicked, joined| panicked | joined.is_err())
        });

        if panicked {
            return Err(worker_panicked());
        }
        if !failures.is_empty() {
            return Err(match self.options.failure_policy {
                FailurePolicy::FailFast => {
                    let first = failures.swap_remove(0);
                    BatchError::query(first.job_id, first.error)
                }
                FailurePolicy::CollectAll => {
                    failures.sort_by_key(|failure| failure.job_id);
                    BatchError::Batch { failures }
                }
            });
        }
        slots
            .into_iter()
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| BatchError::Warehouse("parallel run lost a result".into()))
    }

    fn worker_loop(
        &self,
        worker: usize,
        queries: &[String],
        next: &AtomicUsize,
        cancelled: &AtomicBool,
        tx: Sender<Outcome>,
    ) {
        loop {
            if cancelled.load(Ordering::Acquire) {
                debug!(worker, "parallel.worker.cancelled");
                break;
            }
            let idx = next.fetch_add(1, Ordering::AcqRel);
            let Some(sql) = queries.get(idx) else {
                break;
            };
            debug!(worker, job_id = idx + 1, "parallel.query");
            let outcome = self.run_one(sql);
            // Raised before reporting so no worker claims another query.
            if outcome.is_err() && self.options.failure_policy == FailurePolicy::FailFast {
                cancelled.store(true, Ordering::Release);
            }
            if tx.send((idx, outcome)).is_err() {
                break;
            }
        }
    }

    fn run_one(&self, sql: &str) -> Result<ResultSet> {
        let mut session = self.warehouse.connect()?;
        session.query(sql)
    }
}

impl<W: Warehouse> Runner for ParallelRunner<W> {
    fn kind(&self) -> RunnerKind {
        RunnerKind::Parallel
    }

    fn run(&self, queries: &[String], materialise_subset: bool) -> Result<RunOutput> {
        let started = Instant::now();
        info!(
            strategy = "parallel",
            queries = queries.len(),
            workers = self.pool_size(queries.len()),
            materialise_subset,
            "run.start"
        );

        // The setup session stays open only when it must drop the subset later.
        let keep_setup = materialise_subset && self.teardown.drops(Scope::Shared);
        let mut setup = None;
        if materialise_subset {
            let mut session = self.warehouse.connect()?;
            self.subset.create_subset(&mut session)?;
            if keep_setup {
                setup = Some(session);
            }
        }
        let mut scoped = setup
            .as_mut()
            .map(|session| ScopedResources::new(session, self.teardown));
        if let Some(scoped) = scoped.as_mut() {
            scoped.track(
                ServerObject::Table(self.subset.subset_table().to_string()),
                Scope::Shared,
            );
        }

        let results = self.dispatch(queries)?;
        info!(
            strategy = "parallel",
            queries = queries.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "run.finish"
        );
        Ok(RunOutput::PerQuery(results))
    }
}
