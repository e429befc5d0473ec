use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::types::ValueRef;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use super::dialect::{SqliteDialect, SQLITE_PROCEDURE_CATALOG};
use super::{Dialect, ResultSet, Session, Value, Warehouse};
use crate::error::{BatchError, Result};

const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Embedded warehouse backed by a SQLite database file.
///
/// Every [`Warehouse::connect`] opens a new connection to the same file, so
/// parallel runs get one connection per query just like a remote warehouse.
#[derive(Clone, Debug)]
pub struct SqliteWarehouse {
    path: PathBuf,
    busy_timeout: Duration,
}

impl SqliteWarehouse {
    /// Uses the database file at `path`, creating it on first connect.
    pub fn open(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        }
    }

    /// Overrides how long a connection waits on a locked database.
    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    /// Path of the database file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Warehouse for SqliteWarehouse {
    type Session = SqliteSession;

    fn connect(&self) -> Result<SqliteSession> {
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(self.busy_timeout)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Ok(SqliteSession {
            conn,
            dialect: SqliteDialect,
        })
    }
}

/// One connection to a [`SqliteWarehouse`].
pub struct SqliteSession {
    conn: Connection,
    dialect: SqliteDialect,
}

impl SqliteSession {
    /// Borrows the underlying connection.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    fn registered_driver(&self, procedure: &str) -> Result<String> {
        let catalog_exists: bool = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
            params![SQLITE_PROCEDURE_CATALOG],
            |row| row.get(0),
        )?;
        let driver = if catalog_exists {
            self.conn
                .query_row(
                    &format!("SELECT driver_table FROM {SQLITE_PROCEDURE_CATALOG} WHERE name = ?1"),
                    params![procedure],
                    |row| row.get::<_, String>(0),
                )
                .optional()?
        } else {
            None
        };
        driver.ok_or_else(|| BatchError::Warehouse(format!("procedure {procedure} does not exist")))
    }
}

fn to_value(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(v) => Value::Integer(v),
        ValueRef::Real(v) => Value::Real(v),
        ValueRef::Text(v) => Value::Text(String::from_utf8_lossy(v).into_owned()),
        ValueRef::Blob(v) => Value::Blob(v.to_vec()),
    }
}

impl Session for SqliteSession {
    fn dialect(&self) -> &dyn Dialect {
        &self.dialect
    }

    fn execute(&mut self, sql: &str) -> Result<u64> {
        let changed = self.conn.execute(sql, [])?;
        Ok(changed as u64)
    }

    fn query(&mut self, sql: &str) -> Result<ResultSet> {
        let mut stmt = self.conn.prepare(sql)?;
        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let width = columns.len();
        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(width);
            for idx in 0..width {
                values.push(to_value(row.get_ref(idx)?));
            }
            out.push(values);
        }
        Ok(ResultSet::new(columns, out))
    }

    fn transaction(&mut self, statements: &[String]) -> Result<()> {
        let tx = self.conn.transaction()?;
        for statement in statements {
            tx.execute(statement, [])?;
        }
        tx.commit()?;
        Ok(())
    }

    fn call_procedure(&mut self, procedure: &str) -> Result<()> {
        let driver = self.registered_driver(procedure)?;
        let jobs: Vec<(i64, String)> = {
            let mut stmt = self
                .conn
                .prepare(&format!("SELECT job_id, sql_text FROM {driver} ORDER BY job_id"))?;
            let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
            rows.collect::<rusqlite::Result<_>>()?
        };
        debug!(procedure, driver = %driver, jobs = jobs.len(), "sqlite.call_procedure");

        let tx = self.conn.transaction()?;
        for (job_id, sql_text) in &jobs {
            if let Err(err) = tx.execute_batch(sql_text) {
                debug!(procedure, job_id, error = %err, "sqlite.call_procedure.failed");
                return Err(BatchError::Warehouse(format!(
                    "CALL {procedure} failed: {err}"
                )));
            }
        }
        tx.commit()?;
        Ok(())
    }
}
