//! Connection capability the scheduler needs from a SQL warehouse.
//!
//! The scheduler only ever talks to a warehouse through [`Warehouse`] (a
//! session factory) and [`Session`] (one logical client connection). All SQL
//! text that depends on the target dialect is produced by a [`Dialect`].

mod dialect;
mod sqlite;

use std::fmt;

use serde::Serialize;

use crate::error::Result;

pub use dialect::{ColumnDef, ColumnType, Dialect, SqliteDialect, TeradataDialect};
pub use sqlite::{SqliteSession, SqliteWarehouse};

/// A single cell value returned by a warehouse.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    /// SQL NULL.
    Null,
    /// Integer value.
    Integer(i64),
    /// Floating point value.
    Real(f64),
    /// Text value.
    Text(String),
    /// Raw bytes.
    Blob(Vec<u8>),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Integer(v) => write!(f, "{v}"),
            Value::Real(v) => write!(f, "{v}"),
            Value::Text(v) => f.write_str(v),
            Value::Blob(v) => write!(f, "<{} bytes>", v.len()),
        }
    }
}

/// Tabular rows returned by one query.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ResultSet {
    /// Column names in projection order.
    pub columns: Vec<String>,
    /// Rows, each with one value per column.
    pub rows: Vec<Vec<Value>>,
}

impl ResultSet {
    /// Creates a result set from column names and rows.
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        Self { columns, rows }
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns true when the result has no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Position of a column, compared case-insensitively.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|col| col.eq_ignore_ascii_case(name))
    }

    /// Iterates the values of one column.
    pub fn column<'a>(&'a self, name: &str) -> Option<impl Iterator<Item = &'a Value> + 'a> {
        let idx = self.column_index(name)?;
        Some(self.rows.iter().filter_map(move |row| row.get(idx)))
    }
}

/// Kinds of server-side objects a run creates and may later drop.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ServerObject {
    /// A table.
    Table(String),
    /// A stored procedure.
    Procedure(String),
}

impl ServerObject {
    /// Name of the object.
    pub fn name(&self) -> &str {
        match self {
            ServerObject::Table(name) | ServerObject::Procedure(name) => name,
        }
    }
}

impl fmt::Display for ServerObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerObject::Table(name) => write!(f, "table {name}"),
            ServerObject::Procedure(name) => write!(f, "procedure {name}"),
        }
    }
}

/// One logical client connection to a warehouse.
///
/// Sessions are never shared between threads; a parallel run opens one
/// session per query through [`Warehouse::connect`].
pub trait Session: Send {
    /// SQL dialect spoken by this session.
    fn dialect(&self) -> &dyn Dialect;

    /// Executes a statement that returns no rows, reporting affected rows.
    fn execute(&mut self, sql: &str) -> Result<u64>;

    /// Executes a statement and collects its rows.
    fn query(&mut self, sql: &str) -> Result<ResultSet>;

    /// Runs the statements as one unit of work, committing only if all succeed.
    fn transaction(&mut self, statements: &[String]) -> Result<()>;

    /// Installs (create-or-replace) the batch procedure reading `driver_table`.
    fn install_procedure(&mut self, procedure: &str, driver_table: &str) -> Result<()> {
        let statements = self.dialect().create_procedure(procedure, driver_table);
        for statement in statements {
            self.execute(&statement)?;
        }
        Ok(())
    }

    /// Invokes a procedure previously installed with [`Session::install_procedure`].
    fn call_procedure(&mut self, procedure: &str) -> Result<()> {
        let sql = self.dialect().call_procedure(procedure);
        self.execute(&sql).map(|_| ())
    }

    /// Drops a server-side object if it exists.
    fn drop_object(&mut self, object: &ServerObject) -> Result<()> {
        let sql = match object {
            ServerObject::Table(name) => self.dialect().drop_table(name),
            ServerObject::Procedure(name) => self.dialect().drop_procedure(name),
        };
        self.execute(&sql).map(|_| ())
    }
}

impl<S: Session + ?Sized> Session for Box<S> {
    fn dialect(&self) -> &dyn Dialect {
        (**self).dialect()
    }

    fn execute(&mut self, sql: &str) -> Result<u64> {
        (**self).execute(sql)
    }

    fn query(&mut self, sql: &str) -> Result<ResultSet> {
        (**self).query(sql)
    }

    fn transaction(&mut self, statements: &[String]) -> Result<()> {
        (**self).transaction(statements)
    }

    fn install_procedure(&mut self, procedure: &str, driver_table: &str) -> Result<()> {
        (**self).install_procedure(procedure, driver_table)
    }

    fn call_procedure(&mut self, procedure: &str) -> Result<()> {
        (**self).call_procedure(procedure)
    }

    fn drop_object(&mut self, object: &ServerObject) -> Result<()> {
        (**self).drop_object(object)
    }
}

/// Factory for warehouse sessions.
pub trait Warehouse: Send + Sync {
    /// Session type produced by this warehouse.
    type Session: Session;

    /// Opens a new session.
    fn connect(&self) -> Result<Self::Session>;
}

impl<W: Warehouse + ?Sized> Warehouse for std::sync::Arc<W> {
    type Session = W::Session;

    fn connect(&self) -> Result<Self::Session> {
        (**self).connect()
    }
}
