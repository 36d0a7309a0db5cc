//! Generic relational driver contract
//!
//! Stores only ever see [`SqlDriver`]: a statement runner with positional
//! parameters, fully materialised result rows and explicit transaction
//! control. [`SqliteDriver`] is the implementation shipped with the crate.

use rusqlite::types::{ToSql, ToSqlOutput, Value, ValueRef};
use rusqlite::{params_from_iter, Connection};
use std::path::Path;
use tracing::debug;

use crate::storage::{Result, StorageError};

/// Database engine family behind a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Engine {
    Sqlite,
    MySql,
    /// MySQL wire-compatible servers (MariaDB, TiDB, ...)
    MySqlLike,
    Postgres,
}

/// A single bound parameter or result column
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
    Bool(bool),
}

impl SqlValue {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SqlValue::Integer(i) => Some(*i),
            SqlValue::Bool(b) => Some(i64::from(*b)),
            SqlValue::Real(f) => Some(*f as i64),
            SqlValue::Text(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            SqlValue::Bool(b) => Some(*b),
            SqlValue::Integer(i) => Some(*i != 0),
            SqlValue::Text(s) => match s.as_str() {
                "1" | "t" | "true" => Some(true),
                "0" | "f" | "false" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            SqlValue::Text(s) => Some(s),
            SqlValue::Blob(b) => std::str::from_utf8(b).ok(),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            SqlValue::Blob(b) => Some(b),
            SqlValue::Text(s) => Some(s.as_bytes()),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }
}

impl From<&str> for SqlValue {
    fn from(s: &str) -> Self {
        SqlValue::Text(s.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(s: String) -> Self {
        SqlValue::Text(s)
    }
}

impl From<i64> for SqlValue {
    fn from(i: i64) -> Self {
        SqlValue::Integer(i)
    }
}

impl From<bool> for SqlValue {
    fn from(b: bool) -> Self {
        SqlValue::Bool(b)
    }
}

impl From<Vec<u8>> for SqlValue {
    fn from(b: Vec<u8>) -> Self {
        SqlValue::Blob(b)
    }
}

impl ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            SqlValue::Null => ToSqlOutput::Owned(Value::Null),
            SqlValue::Integer(i) => ToSqlOutput::Owned(Value::Integer(*i)),
            SqlValue::Real(f) => ToSqlOutput::Owned(Value::Real(*f)),
            SqlValue::Bool(b) => ToSqlOutput::Owned(Value::Integer(i64::from(*b))),
            SqlValue::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            SqlValue::Blob(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b)),
        })
    }
}

impl From<ValueRef<'_>> for SqlValue {
    fn from(value: ValueRef<'_>) -> Self {
        match value {
            ValueRef::Null => SqlValue::Null,
            ValueRef::Integer(i) => SqlValue::Integer(i),
            ValueRef::Real(f) => SqlValue::Real(f),
            ValueRef::Text(t) => SqlValue::Text(String::from_utf8_lossy(t).into_owned()),
            ValueRef::Blob(b) => SqlValue::Blob(b.to_vec()),
        }
    }
}

/// One result row, columns in select order
pub type SqlRow = Vec<SqlValue>;

/// Relational connection used by the object and ref stores
pub trait SqlDriver {
    fn engine(&self) -> Engine;

    /// Run a statement and return the number of affected rows
    fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<usize>;

    /// Run a query and collect every row
    fn query(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<SqlRow>>;

    /// Run one statement once per parameter row, returning total affected rows
    fn execute_batch(&self, sql: &str, rows: &[Vec<SqlValue>]) -> Result<usize>;

    fn is_auto_commit(&self) -> bool;

    /// Switch between auto-commit and manual transaction mode
    fn set_auto_commit(&mut self, auto_commit: bool) -> Result<()>;

    /// Commit the open transaction, if any
    fn commit(&mut self) -> Result<()>;

    /// Release the connection; uncommitted work is discarded
    fn close(self: Box<Self>) -> Result<()>;
}

/// SQLite connection through rusqlite
pub struct SqliteDriver {
    conn: Connection,
    auto_commit: bool,
}

impl SqliteDriver {
    /// Open (or create) a database file
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!("opening sqlite database at {:?}", path);
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Ok(Self::from_connection(conn))
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::from_connection(Connection::open_in_memory()?))
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn,
            auto_commit: true,
        }
    }

    // Manual mode opens a transaction lazily before the first statement
    fn begin_if_needed(&self) -> Result<()> {
        if !self.auto_commit && self.conn.is_autocommit() {
            self.conn.execute_batch("BEGIN")?;
        }
        Ok(())
    }
}

impl SqlDriver for SqliteDriver {
    fn engine(&self) -> Engine {
        Engine::Sqlite
    }

    fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<usize> {
        self.begin_if_needed()?;
        let mut stmt = self.conn.prepare_cached(sql)?;
        Ok(stmt.execute(params_from_iter(params.iter()))?)
    }

    fn query(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<SqlRow>> {
        self.begin_if_needed()?;
        let mut stmt = self.conn.prepare_cached(sql)?;
        let columns = stmt.column_count();
        let mut rows = stmt.query(params_from_iter(params.iter()))?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(columns);
            for i in 0..columns {
                values.push(SqlValue::from(row.get_ref(i)?));
            }
            out.push(values);
        }
        Ok(out)
    }

    fn execute_batch(&self, sql: &str, rows: &[Vec<SqlValue>]) -> Result<usize> {
        self.begin_if_needed()?;
        let mut stmt = self.conn.prepare_cached(sql)?;
        let mut affected = 0;
        for params in rows {
            affected += stmt.execute(params_from_iter(params.iter()))?;
        }
        Ok(affected)
    }

    fn is_auto_commit(&self) -> bool {
        self.auto_commit
    }

    fn set_auto_commit(&mut self, auto_commit: bool) -> Result<()> {
        if auto_commit && !self.conn.is_autocommit() {
            // Leaving manual mode commits, like JDBC's setAutoCommit(true)
            self.conn.execute_batch("COMMIT")?;
        }
        self.auto_commit = auto_commit;
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        if !self.conn.is_autocommit() {
            debug!("committing transaction");
            self.conn.execute_batch("COMMIT")?;
        }
        Ok(())
    }

    fn close(self: Box<Self>) -> Result<()> {
        if !self.conn.is_autocommit() {
            self.conn.execute_batch("ROLLBACK")?;
        }
        self.conn
            .close()
            .map_err(|(_, e)| StorageError::Database(e))
    }
}
