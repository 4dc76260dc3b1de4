//! Data Store Accessor
//!
//! Executes raw SQL against the opportunity table and returns rows of typed
//! scalars. Every read opens a fresh connection, executes, and closes it;
//! no pooling, which is fine at single-user demo scale and means every
//! caller always sees the live dataset.
//!
//! Read failures are swallowed into `None`: callers treat "no data" and
//! "store unreachable" identically and render a zero. Write failures are
//! surfaced, since the admin panel shows them to the user.

use crate::error::{EngineError, Result};
use chrono::NaiveDate;
use rusqlite::types::ValueRef;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// The single backing table.
pub const TABLE: &str = "sales_pipeline";

/// Opportunity lifecycle stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stage {
    Engaging,
    Won,
    Lost,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Engaging => "Engaging",
            Stage::Won => "Won",
            Stage::Lost => "Lost",
        }
    }
}

/// One typed cell of a query result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Scalar {
    Null,
    Int(i64),
    Real(f64),
    Text(String),
}

impl Scalar {
    /// Numeric view; NULL and non-numeric text read as 0.0, matching how
    /// every calculator treats missing data.
    pub fn as_f64(&self) -> f64 {
        match self {
            Scalar::Int(v) => *v as f64,
            Scalar::Real(v) => *v,
            Scalar::Text(s) => s.parse().unwrap_or(0.0),
            Scalar::Null => 0.0,
        }
    }

    pub fn as_i64(&self) -> i64 {
        match self {
            Scalar::Int(v) => *v,
            Scalar::Real(v) => *v as i64,
            Scalar::Text(s) => s.parse().unwrap_or(0),
            Scalar::Null => 0,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Scalar::Text(s) => s.as_str(),
            _ => "",
        }
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            Scalar::Text(s) => NaiveDate::parse_from_str(s, "%Y-%m-%d").ok(),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Scalar::Null)
    }
}

pub type Row = Vec<Scalar>;

/// Engine-specific SQL rendering.
///
/// The metric, alert, and investigation queries are engine-agnostic except
/// for date arithmetic, which differs between the embedded engine and the
/// networked one the earlier deployments ran on. All date expressions are
/// rendered here so the calculators never embed a dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlDialect {
    Sqlite,
    MySql,
}

impl SqlDialect {
    /// Whole days from `b` to `a` (a - b).
    pub fn datediff(self, a: &str, b: &str) -> String {
        match self {
            SqlDialect::Sqlite => {
                format!("CAST(julianday({a}) - julianday({b}) AS INTEGER)")
            }
            SqlDialect::MySql => format!("DATEDIFF({a}, {b})"),
        }
    }

    /// `expr` shifted back by `days` days.
    pub fn days_before(self, expr: &str, days: i64) -> String {
        match self {
            SqlDialect::Sqlite => format!("date({expr}, '-{days} days')"),
            SqlDialect::MySql => format!("DATE_SUB({expr}, INTERVAL {days} DAY)"),
        }
    }

    /// Today, wall clock. Only the admin mutations use this; the
    /// calculators derive their reference date from the data instead.
    pub fn current_date(self) -> &'static str {
        match self {
            SqlDialect::Sqlite => "date('now')",
            SqlDialect::MySql => "CURDATE()",
        }
    }

    /// `YYYY-MM` bucket of a date expression.
    pub fn month_of(self, expr: &str) -> String {
        match self {
            SqlDialect::Sqlite => format!("strftime('%Y-%m', {expr})"),
            SqlDialect::MySql => format!("DATE_FORMAT({expr}, '%Y-%m')"),
        }
    }

    /// `YYYY-Qn` bucket of a date expression.
    pub fn quarter_of(self, expr: &str) -> String {
        match self {
            SqlDialect::Sqlite => format!(
                "strftime('%Y', {expr}) || '-Q' || ((CAST(strftime('%m', {expr}) AS INTEGER) + 2) / 3)"
            ),
            SqlDialect::MySql => {
                format!("CONCAT(YEAR({expr}), '-Q', QUARTER({expr}))")
            }
        }
    }
}

/// Accessor over the embedded store file.
#[derive(Debug, Clone)]
pub struct Store {
    path: PathBuf,
    dialect: SqlDialect,
}

impl Store {
    pub fn open<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            dialect: SqlDialect::Sqlite,
        }
    }

    pub fn dialect(&self) -> SqlDialect {
        self.dialect
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn connect(&self) -> Result<Connection> {
        Connection::open(&self.path).map_err(|e| EngineError::Store(e.to_string()))
    }

    /// Execute a read query and collect every row as typed scalars.
    ///
    /// Any failure (unreachable file, malformed SQL, missing table) is
    /// logged and swallowed into `None` so callers degrade to "no data".
    pub fn query(&self, sql: &str) -> Option<Vec<Row>> {
        debug!("store query: {}", sql);
        match self.try_query(sql) {
            Ok(rows) => Some(rows),
            Err(e) => {
                warn!("store query failed, returning no data: {}", e);
                None
            }
        }
    }

    fn try_query(&self, sql: &str) -> Result<Vec<Row>> {
        let conn = self.connect()?;
        let mut stmt = conn
            .prepare(sql)
            .map_err(|e| EngineError::Store(e.to_string()))?;
        let col_count = stmt.column_count();

        let mut rows_out = Vec::new();
        let mut rows = stmt
            .query([])
            .map_err(|e| EngineError::Store(e.to_string()))?;
        while let Some(row) = rows.next().map_err(|e| EngineError::Store(e.to_string()))? {
            let mut out: Row = Vec::with_capacity(col_count);
            for idx in 0..col_count {
                let value = row
                    .get_ref(idx)
                    .map_err(|e| EngineError::Store(e.to_string()))?;
                out.push(scalar_from_ref(value));
            }
            rows_out.push(out);
        }
        Ok(rows_out)
    }

    /// Execute one write statement. Errors are returned, not swallowed;
    /// a failed mutation must be visible to the admin.
    pub fn execute(&self, sql: &str, params: &[&dyn rusqlite::ToSql]) -> Result<usize> {
        let conn = self.connect()?;
        conn.execute(sql, params)
            .map_err(|e| EngineError::Store(e.to_string()))
    }

    /// Run a batch of statements (DDL, reset).
    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        let conn = self.connect()?;
        conn.execute_batch(sql)
            .map_err(|e| EngineError::Store(e.to_string()))
    }
}

fn scalar_from_ref(value: ValueRef<'_>) -> Scalar {
    match value {
        ValueRef::Null => Scalar::Null,
        ValueRef::Integer(v) => Scalar::Int(v),
        ValueRef::Real(v) => Scalar::Real(v),
        ValueRef::Text(t) => Scalar::Text(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(_) => Scalar::Null,
    }
}
