use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::{RunOutput, Runner, RunnerKind};
use crate::config::{ServerSideOptions, Teardown};
use crate::error::{BatchError, Result};
use crate::resources::{ResourceNames, Scope, ScopedResources};
use crate::subset::{SubsetManager, SubsetSpec};
use crate::warehouse::{ColumnDef, ColumnType, ResultSet, ServerObject, Session, Warehouse};

/// Capacity of the driver table's `sql_text` column.
pub const DRIVER_SQL_TEXT_LEN: u32 = 31_000;

/// One step of a server-side run, in execution order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Step {
    /// Every query references the subset table.
    Validate,
    /// Driver table (re)created.
    EnsureDriverTable,
    /// Output table (re)created.
    EnsureOutputTable,
    /// Batch procedure installed.
    EnsureStoredProcedure,
    /// Subset table materialised.
    CreateSubset,
    /// One driver row per query loaded.
    LoadDriverTable,
    /// Batch procedure called.
    ExecuteServerSide,
    /// Output table read back.
    FetchResults,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Step::Validate => "validate",
            Step::EnsureDriverTable => "ensure_driver_table",
            Step::EnsureOutputTable => "ensure_output_table",
            Step::EnsureStoredProcedure => "ensure_stored_procedure",
            Step::CreateSubset => "create_subset",
            Step::LoadDriverTable => "load_driver_table",
            Step::ExecuteServerSide => "execute_server_side",
            Step::FetchResults => "fetch_results",
        };
        f.write_str(name)
    }
}

/// Notified as each step of a server-side run completes.
pub trait StepObserver: Send + Sync {
    /// Called after `step` succeeded.
    fn on_step(&self, step: Step, names: &ResourceNames);
}

/// Observer that records completed steps and the names of the last run.
#[derive(Default)]
pub struct StepRecorder {
    steps: Mutex<Vec<Step>>,
    names: Mutex<Option<ResourceNames>>,
}

impl StepRecorder {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Steps recorded so far.
    pub fn steps(&self) -> Vec<Step> {
        self.steps.lock().clone()
    }

    /// Resource names of the most recent run.
    pub fn last_names(&self) -> Option<ResourceNames> {
        self.names.lock().clone()
    }
}

impl StepObserver for StepRecorder {
    fn on_step(&self, step: Step, names: &ResourceNames) {
        self.steps.lock().push(step);
        let mut last = self.names.lock();
        if last.as_ref() != Some(names) {
            *last = Some(names.clone());
        }
    }
}

/// Runs the whole batch inside the warehouse through a generated procedure.
///
/// Submitted queries are `INSERT ... SELECT` statements writing into the
/// output table; the run returns that table ordered by `job_id`.
pub struct ServerSideRunner<W> {
    warehouse: W,
    subset: SubsetManager,
    options: ServerSideOptions,
    teardown: Teardown,
    observer: Option<Arc<dyn StepObserver>>,
}

impl<W: Warehouse> ServerSideRunner<W> {
    /// Creates a server-side runner.
    pub fn new(warehouse: W, subset: SubsetSpec, options: ServerSideOptions) -> Self {
        Self {
            warehouse,
            subset: SubsetManager::new(subset),
            options,
            teardown: Teardown::default(),
            observer: None,
        }
    }

    /// Sets the teardown policy.
    pub fn teardown(mut self, teardown: Teardown) -> Self {
        self.teardown = teardown;
        self
    }

    /// Installs a step observer.
    pub fn observer(mut self, observer: Arc<dyn StepObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Resolves resource names for one run under the configured teardown.
    pub fn resource_names(&self) -> ResourceNames {
        ResourceNames::for_teardown(self.subset.subset_table(), &self.options, self.teardown)
    }

    /// Rejects any query that does not mention the subset table (case-insensitive).
    pub fn validate_queries(&self, queries: &[String]) -> Result<()> {
        let table = self.subset.subset_table();
        let needle = table.to_ascii_lowercase();
        for (idx, query) in queries.iter().enumerate() {
            if !query.to_ascii_lowercase().contains(&needle) {
                return Err(BatchError::Validation {
                    job_id: idx + 1,
                    query: query.clone(),
                    table: table.to_string(),
                });
            }
        }
        Ok(())
    }

    /// (Re)creates the `{job_id, sql_text}` driver table.
    pub fn ensure_driver_table<S: Session + ?Sized>(
        &self,
        scoped: &mut ScopedResources<'_, S>,
        names: &ResourceNames,
    ) -> Result<()> {
        let columns = [
            ColumnDef::new("job_id", ColumnType::Integer),
            ColumnDef::new("sql_text", ColumnType::Varchar(DRIVER_SQL_TEXT_LEN)),
        ];
        recreate_table(scoped.session(), &names.driver, &columns)?;
        scoped.track(ServerObject::Table(names.driver.clone()), Scope::Run);
        Ok(())
    }

    /// (Re)creates the output table with the configured columns.
    pub fn ensure_output_table<S: Session + ?Sized>(
        &self,
        scoped: &mut ScopedResources<'_, S>,
        names: &ResourceNames,
    ) -> Result<()> {
        recreate_table(scoped.session(), &names.output, &self.options.output_columns)?;
        scoped.track(ServerObject::Table(names.output.clone()), Scope::Shared);
        Ok(())
    }

    /// Installs (create-or-replace) the cursor-driven batch procedure.
    pub fn ensure_stored_procedure<S: Session + ?Sized>(
        &self,
        scoped: &mut ScopedResources<'_, S>,
        names: &ResourceNames,
    ) -> Result<()> {
        scoped
            .session()
            .install_procedure(&names.procedure, &names.driver)?;
        scoped.track(ServerObject::Procedure(names.procedure.clone()), Scope::Run);
        Ok(())
    }

    /// Inserts one driver row per query, `job_id` being the 1-based position.
    pub fn load_driver_table<S: Session + ?Sized>(
        &self,
        session: &mut S,
        names: &ResourceNames,
        queries: &[String],
    ) -> Result<()> {
        let statements: Vec<String> = {
            let dialect = session.dialect();
            queries
                .iter()
                .enumerate()
                .map(|(idx, sql)| dialect.insert_driver_row(&names.driver, idx + 1, sql))
                .collect()
        };
        if statements.is_empty() {
            return Ok(());
        }
        session.transaction(&statements)
    }

    /// Calls the batch procedure once.
    pub fn execute_server_side<S: Session + ?Sized>(
        &self,
        session: &mut S,
        names: &ResourceNames,
    ) -> Result<()> {
        session.call_procedure(&names.procedure).inspect_err(|err| {
            warn!(procedure = %names.procedure, error = %err, "server_side.call_failed");
        })
    }

    /// Reads the output table ordered by `job_id` (and `sequence_num` when present).
    pub fn fetch_results<S: Session + ?Sized>(
        &self,
        session: &mut S,
        names: &ResourceNames,
    ) -> Result<ResultSet> {
        let mut order_by = vec!["job_id"];
        if self
            .options
            .output_columns
            .iter()
            .any(|col| col.name.eq_ignore_ascii_case("sequence_num"))
        {
            order_by.push("sequence_num");
        }
        let sql = session.dialect().select_ordered(&names.output, &order_by);
        session.query(&sql)
    }

    fn notify(&self, step: Step, names: &ResourceNames) {
        debug!(%step, run_id = %names.run_id, "server_side.step");
        if let Some(observer) = &self.observer {
            observer.on_step(step, names);
        }
    }
}

fn recreate_table<S: Session + ?Sized>(
    session: &mut S,
    name: &str,
    columns: &[ColumnDef],
) -> Result<()> {
    let drop_sql = session.dialect().drop_table(name);
    let conditional = session.dialect().drop_is_conditional();
    match session.execute(&drop_sql) {
        Ok(_) => {}
        Err(err) if !conditional => debug!(table = name, error = %err, "server_side.drop_skipped"),
        Err(err) => return Err(err),
    }
    let create_sql = session.dialect().create_table(name, columns);
    session.execute(&create_sql)?;
    Ok(())
}

impl<W: Warehouse> Runner for ServerSideRunner<W> {
    fn kind(&self) -> RunnerKind {
        RunnerKind::ServerSide
    }

    fn run(&self, queries: &[String], materialise_subset: bool) -> Result<RunOutput> {
        let started = Instant::now();
        let names = self.resource_names();
        info!(
            strategy = "server-side",
            queries = queries.len(),
            run_id = %names.run_id,
            materialise_subset,
            "run.start"
        );

        let queries: Vec<String> = queries.iter().map(|sql| names.render(sql)).collect();
        self.validate_queries(&queries)?;
        self.notify(Step::Validate, &names);

        let mut session = self.warehouse.connect()?;
        let mut scoped = ScopedResources::new(&mut session, self.teardown);

        self.ensure_driver_table(&mut scoped, &names)?;
        self.notify(Step::EnsureDriverTable, &names);
        self.ensure_output_table(&mut scoped, &names)?;
        self.notify(Step::EnsureOutputTable, &names);
        self.ensure_stored_procedure(&mut scoped, &names)?;
        self.notify(Step::EnsureStoredProcedure, &names);

        if materialise_subset {
            self.subset.create_subset(scoped.session())?;
            scoped.track(ServerObject::Table(names.subset.clone()), Scope::Shared);
            self.notify(Step::CreateSubset, &names);
        }

        self.load_driver_table(scoped.session(), &names, &queries)?;
        self.notify(Step::LoadDriverTable, &names);
        self.execute_server_side(scoped.session(), &names)?;
        self.notify(Step::ExecuteServerSide, &names);
        let results = self.fetch_results(scoped.session(), &names)?;
        self.notify(Step::FetchResults, &names);

        info!(
            strategy = "server-side",
            queries = queries.len(),
            rows = results.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "run.finish"
        );
        Ok(RunOutput::Combined(results))
    }
}
