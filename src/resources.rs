//! Run-scoped naming and teardown of server-side objects.

use tracing::{debug, warn};

use crate::config::{ServerSideOptions, Teardown};
use crate::warehouse::{ServerObject, Session};

/// Placeholder rendered to the run's subset table name.
pub const SUBSET_PLACEHOLDER: &str = "{subset}";
/// Placeholder rendered to the run's output table name.
pub const OUTPUT_PLACEHOLDER: &str = "{output}";

/// Generates a fresh 8-hex-digit run identifier.
pub fn new_run_id() -> String {
    format!("{:08x}", rand::random::<u32>())
}

/// Names of every server-side object one run touches.
///
/// The driver table and procedure carry the run id so overlapping runs do not
/// collide, except under [`Teardown::Keep`] where they keep their base names
/// and each run replaces the previous run's pair. Subset and output names are
/// caller-visible and used verbatim.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceNames {
    /// Identifier of the run.
    pub run_id: String,
    /// Subset table queried by the batch.
    pub subset: String,
    /// Driver table holding one row per job.
    pub driver: String,
    /// Output table the jobs insert into.
    pub output: String,
    /// Batch procedure.
    pub procedure: String,
}

impl ResourceNames {
    /// Resolves names for a run with the given id.
    pub fn with_run_id(subset: &str, options: &ServerSideOptions, run_id: &str) -> Self {
        Self {
            run_id: run_id.to_string(),
            subset: subset.to_string(),
            driver: format!("{}_{run_id}", options.driver_table),
            output: options.output_table.clone(),
            procedure: format!("{}_{run_id}", options.procedure),
        }
    }

    /// Resolves names for a new run.
    pub fn for_run(subset: &str, options: &ServerSideOptions) -> Self {
        Self::with_run_id(subset, options, &new_run_id())
    }

    /// Resolves names for a new run under `teardown`.
    ///
    /// Kept objects are never dropped, so they use the unsuffixed base names.
    pub fn for_teardown(subset: &str, options: &ServerSideOptions, teardown: Teardown) -> Self {
        let mut names = Self::for_run(subset, options);
        if teardown == Teardown::Keep {
            names.driver = options.driver_table.clone();
            names.procedure = options.procedure.clone();
        }
        names
    }

    /// Replaces `{subset}` and `{output}` placeholders in `sql`.
    pub fn render(&self, sql: &str) -> String {
        sql.replace(SUBSET_PLACEHOLDER, &self.subset)
            .replace(OUTPUT_PLACEHOLDER, &self.output)
    }
}

/// Lifetime class of a tracked object.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Scope {
    /// Private to one run (driver table, procedure).
    Run,
    /// Visible to the caller (output table, subset table).
    Shared,
}

impl Teardown {
    pub(crate) fn drops(self, scope: Scope) -> bool {
        match self {
            Teardown::Keep => false,
            Teardown::RunScoped => scope == Scope::Run,
            Teardown::All => true,
        }
    }
}

/// Session wrapper that drops the objects a run created when it goes away.
///
/// Objects are dropped in reverse creation order on every exit path,
/// including early returns and unwinding. Drop failures are logged only.
pub struct ScopedResources<'s, S: Session + ?Sized> {
    session: &'s mut S,
    teardown: Teardown,
    created: Vec<(ServerObject, Scope)>,
}

impl<'s, S: Session + ?Sized> ScopedResources<'s, S> {
    /// Wraps `session` with the given teardown policy.
    pub fn new(session: &'s mut S, teardown: Teardown) -> Self {
        Self {
            session,
            teardown,
            created: Vec::new(),
        }
    }

    /// The wrapped session.
    pub fn session(&mut self) -> &mut S {
        &mut *self.session
    }

    /// Records an object the run created.
    pub fn track(&mut self, object: ServerObject, scope: Scope) {
        debug!(object = %object, ?scope, "resources.track");
        self.created.push((object, scope));
    }

    /// Objects recorded so far, in creation order.
    pub fn tracked(&self) -> impl Iterator<Item = &ServerObject> {
        self.created.iter().map(|(object, _)| object)
    }
}

impl<'s, S: Session + ?Sized> Drop for ScopedResources<'s, S> {
    fn drop(&mut self) {
        while let Some((object, scope)) = self.created.pop() {
            if !self.teardown.drops(scope) {
                continue;
            }
            match self.session.drop_object(&object) {
                Ok(()) => debug!(object = %object, "resources.dropped"),
                Err(err) => warn!(object = %object, error = %err, "resources.drop_failed"),
            }
        }
    }
}
