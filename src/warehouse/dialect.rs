use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::BatchError;

/// Name of the catalog table the SQLite backend uses in place of stored procedures.
pub(crate) const SQLITE_PROCEDURE_CATALOG: &str = "_sqlbatch_procedures";

/// Logical column types used for the tables the scheduler creates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ColumnType {
    /// 32-bit integer.
    Integer,
    /// 64-bit integer.
    BigInt,
    /// Bounded character data.
    Varchar(u32),
    /// Timestamp without time zone.
    Timestamp,
}

impl FromStr for ColumnType {
    type Err = BatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "integer" | "int" => return Ok(ColumnType::Integer),
            "bigint" => return Ok(ColumnType::BigInt),
            "timestamp" => return Ok(ColumnType::Timestamp),
            _ => {}
        }
        normalized
            .strip_prefix("varchar(")
            .and_then(|rest| rest.strip_suffix(')'))
            .and_then(|len| len.trim().parse::<u32>().ok())
            .filter(|len| *len > 0)
            .map(ColumnType::Varchar)
            .ok_or_else(|| BatchError::InvalidConfig(format!("unknown column type '{s}'")))
    }
}

impl TryFrom<String> for ColumnType {
    type Error = BatchError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ColumnType> for String {
    fn from(value: ColumnType) -> Self {
        value.to_string()
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnType::Integer => f.write_str("integer"),
            ColumnType::BigInt => f.write_str("bigint"),
            ColumnType::Varchar(len) => write!(f, "varchar({len})"),
            ColumnType::Timestamp => f.write_str("timestamp"),
        }
    }
}

/// A named, typed column of a table the scheduler creates.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    /// Column name.
    pub name: String,
    /// Column type.
    #[serde(rename = "type")]
    pub ty: ColumnType,
}

impl ColumnDef {
    /// Creates a column definition.
    pub fn new(name: impl Into<String>, ty: ColumnType) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

/// Generates the dialect-specific SQL the scheduler issues.
///
/// Table and procedure names are emitted verbatim so callers can pass
/// database-qualified names.
pub trait Dialect: Send + Sync {
    /// Short dialect name used in logs.
    fn name(&self) -> &'static str;

    /// Renders a column type.
    fn column_type(&self, ty: ColumnType) -> String;

    /// Whether [`Dialect::drop_table`] succeeds when the table is missing.
    fn drop_is_conditional(&self) -> bool {
        true
    }

    /// Quotes a string literal.
    fn quote_literal(&self, value: &str) -> String {
        format!("'{}'", value.replace('\'', "''"))
    }

    /// `CREATE TABLE <subset> AS SELECT * FROM <base> [WHERE <filter>]`.
    fn create_table_as(&self, subset: &str, base: &str, filter: Option<&str>) -> String {
        match filter {
            Some(filter) => format!("CREATE TABLE {subset} AS SELECT * FROM {base} WHERE {filter}"),
            None => format!("CREATE TABLE {subset} AS SELECT * FROM {base}"),
        }
    }

    /// Creates a table with the given columns.
    fn create_table(&self, name: &str, columns: &[ColumnDef]) -> String {
        let cols = columns
            .iter()
            .map(|col| format!("{} {}", col.name, self.column_type(col.ty)))
            .collect::<Vec<_>>()
            .join(", ");
        format!("CREATE TABLE {name} ({cols})")
    }

    /// Drops a table.
    fn drop_table(&self, name: &str) -> String {
        format!("DROP TABLE IF EXISTS {name}")
    }

    /// Statements installing a procedure that runs every `sql_text` of the
    /// driver table in `job_id` order.
    fn create_procedure(&self, procedure: &str, driver_table: &str) -> Vec<String>;

    /// Invokes a procedure.
    fn call_procedure(&self, procedure: &str) -> String {
        format!("CALL {procedure}()")
    }

    /// Drops a procedure.
    fn drop_procedure(&self, procedure: &str) -> String;

    /// Inserts one driver-table row.
    fn insert_driver_row(&self, driver_table: &str, job_id: usize, sql_text: &str) -> String {
        format!(
            "INSERT INTO {driver_table} (job_id, sql_text) VALUES ({job_id}, {})",
            self.quote_literal(sql_text)
        )
    }

    /// Selects every row of a table ordered by the given columns.
    fn select_ordered(&self, table: &str, order_by: &[&str]) -> String {
        if order_by.is_empty() {
            format!("SELECT * FROM {table}")
        } else {
            format!("SELECT * FROM {table} ORDER BY {}", order_by.join(", "))
        }
    }
}

/// Teradata SQL, using an SPL cursor loop and `DBC.SysExecSQL`.
#[derive(Clone, Copy, Debug, Default)]
pub struct TeradataDialect;

impl Dialect for TeradataDialect {
    fn name(&self) -> &'static str {
        "teradata"
    }

    fn column_type(&self, ty: ColumnType) -> String {
        match ty {
            ColumnType::Integer => "INTEGER".to_string(),
            ColumnType::BigInt => "BIGINT".to_string(),
            ColumnType::Varchar(len) => format!("VARCHAR({len})"),
            ColumnType::Timestamp => "TIMESTAMP(0)".to_string(),
        }
    }

    fn drop_is_conditional(&self) -> bool {
        false
    }

    fn create_table_as(&self, subset: &str, base: &str, filter: Option<&str>) -> String {
        match filter {
            Some(filter) => {
                format!("CREATE TABLE {subset} AS (SELECT * FROM {base} WHERE {filter}) WITH DATA")
            }
            None => format!("CREATE TABLE {subset} AS (SELECT * FROM {base}) WITH DATA"),
        }
    }

    fn drop_table(&self, name: &str) -> String {
        format!("DROP TABLE {name}")
    }

    fn create_procedure(&self, procedure: &str, driver_table: &str) -> Vec<String> {
        vec![format!(
            "REPLACE PROCEDURE {procedure}()\n\
             BEGIN\n\
             \x20   FOR job AS job_cursor CURSOR FOR\n\
             \x20       SELECT job_id, sql_text FROM {driver_table} ORDER BY job_id\n\
             \x20   DO\n\
             \x20       CALL DBC.SysExecSQL(job.sql_text);\n\
             \x20   END FOR;\n\
             END;"
        )]
    }

    fn call_procedure(&self, procedure: &str) -> String {
        format!("CALL {procedure}()")
    }

    fn drop_procedure(&self, procedure: &str) -> String {
        format!("DROP PROCEDURE {procedure}")
    }
}

/// SQLite, with procedures emulated through a catalog table.
///
/// `create_procedure` registers the driver table in the catalog; the SQLite
/// session interprets `CALL` itself by reading that registration.
#[derive(Clone, Copy, Debug, Default)]
pub struct SqliteDialect;

impl Dialect for SqliteDialect {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn column_type(&self, ty: ColumnType) -> String {
        match ty {
            ColumnType::Integer | ColumnType::BigInt => "INTEGER".to_string(),
            ColumnType::Varchar(_) | ColumnType::Timestamp => "TEXT".to_string(),
        }
    }

    fn create_procedure(&self, procedure: &str, driver_table: &str) -> Vec<String> {
        vec![
            format!(
                "CREATE TABLE IF NOT EXISTS {SQLITE_PROCEDURE_CATALOG} \
                 (name TEXT PRIMARY KEY, driver_table TEXT NOT NULL)"
            ),
            format!(
                "INSERT OR REPLACE INTO {SQLITE_PROCEDURE_CATALOG} (name, driver_table) VALUES ({}, {})",
                self.quote_literal(procedure),
                self.quote_literal(driver_table)
            ),
        ]
    }

    fn drop_procedure(&self, procedure: &str) -> String {
        format!(
            "DELETE FROM {SQLITE_PROCEDURE_CATALOG} WHERE name = {}",
            self.quote_literal(procedure)
        )
    }
}
