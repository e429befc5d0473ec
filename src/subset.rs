//! Materialization of the filtered subset table every strategy queries.

use std::time::Instant;

use tracing::{debug, info};

use crate::error::Result;
use crate::warehouse::Session;

/// Where the subset comes from and what it is called.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubsetSpec {
    /// Large shared table the subset is copied from.
    pub base_table: String,
    /// Optional predicate (without the `WHERE` keyword).
    pub filter: Option<String>,
    /// Name of the subset table.
    pub subset_table: String,
}

impl SubsetSpec {
    /// Creates a subset spec.
    pub fn new(
        base_table: impl Into<String>,
        filter: Option<&str>,
        subset_table: impl Into<String>,
    ) -> Self {
        Self {
            base_table: base_table.into(),
            filter: filter.map(str::to_string),
            subset_table: subset_table.into(),
        }
    }
}

/// Creates subset tables.
#[derive(Clone, Debug)]
pub struct SubsetManager {
    spec: SubsetSpec,
}

impl SubsetManager {
    /// Creates a manager for `spec`.
    pub fn new(spec: SubsetSpec) -> Self {
        Self { spec }
    }

    /// The subset this manager creates.
    pub fn spec(&self) -> &SubsetSpec {
        &self.spec
    }

    /// Name of the subset table.
    pub fn subset_table(&self) -> &str {
        &self.spec.subset_table
    }

    /// Runs `CREATE TABLE <subset> AS SELECT * FROM <base> [WHERE <filter>]`
    /// as one unit of work.
    ///
    /// Not idempotent: fails if the subset table already exists.
    pub fn create_subset<S: Session + ?Sized>(&self, session: &mut S) -> Result<()> {
        create_subset(
            session,
            &self.spec.base_table,
            self.spec.filter.as_deref(),
            &self.spec.subset_table,
        )
    }
}

/// Free-standing form of [`SubsetManager::create_subset`].
pub fn create_subset<S: Session + ?Sized>(
    session: &mut S,
    base_table: &str,
    filter: Option<&str>,
    subset_table: &str,
) -> Result<()> {
    let started = Instant::now();
    let sql = session
        .dialect()
        .create_table_as(subset_table, base_table, filter);
    debug!(sql = %sql, "subset.create");
    session.transaction(&[sql])?;
    info!(
        subset = subset_table,
        base = base_table,
        filtered = filter.is_some(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "subset.materialised"
    );
    Ok(())
}
