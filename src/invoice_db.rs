/// Invoice database: read-only query execution for the analytics pipeline.
///
/// `SqliteExecutor` keeps an r2d2 pool of `query_only` SQLite connections.
/// Each call checks one connection out on the blocking thread pool, runs a
/// single statement, and hands the connection back when the guard drops.

use async_trait::async_trait;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, OpenFlags};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{AnalysisError, PipelineResult};
use crate::settings::DatabaseSettings;

pub type Row = Map<String, Value>;

/// Rows returned by one query, in statement column order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

impl ResultSet {
    pub fn from_rows(rows: Vec<Row>) -> Self {
        let columns = rows
            .first()
            .map(|r| r.keys().cloned().collect())
            .unwrap_or_default();
        Self { columns, rows }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// JSON array of at most `limit` rows, as embedded in prompts.
    pub fn to_prompt_json(&self, limit: usize) -> String {
        let shown: Vec<&Row> = self.rows.iter().take(limit).collect();
        serde_json::to_string(&shown).unwrap_or_else(|_| "[]".to_string())
    }
}

/// Positional bind parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl From<&SqlParam> for SqlValue {
    fn from(param: &SqlParam) -> Self {
        match param {
            SqlParam::Null => SqlValue::Null,
            SqlParam::Integer(n) => SqlValue::Integer(*n),
            SqlParam::Real(f) => SqlValue::Real(*f),
            SqlParam::Text(s) => SqlValue::Text(s.clone()),
        }
    }
}

#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn execute(&self, sql: &str, params: &[SqlParam]) -> PipelineResult<ResultSet>;
}

pub struct SqliteExecutor {
    pool: Pool<SqliteConnectionManager>,
    max_rows: usize,
}

impl SqliteExecutor {
    /// Open a pool on an existing database file.
    pub fn open(path: &Path, cfg: &DatabaseSettings) -> PipelineResult<Self> {
        let busy_timeout = Duration::from_millis(cfg.busy_timeout_ms);
        let manager = SqliteConnectionManager::file(path)
            .with_flags(OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX | OpenFlags::SQLITE_OPEN_URI)
            .with_init(move |conn| {
                conn.busy_timeout(busy_timeout)?;
                conn.execute_batch("PRAGMA query_only = ON;")
            });

        let pool = Pool::builder()
            .max_size(cfg.pool_size.max(1))
            .connection_timeout(busy_timeout.max(Duration::from_secs(1)))
            .build(manager)?;

        debug!(target: "pipeline", path = %path.display(), pool_size = cfg.pool_size, "SQLite pool ready");
        Ok(Self { pool, max_rows: cfg.max_rows.max(1) })
    }
}

#[async_trait]
impl QueryExecutor for SqliteExecutor {
    async fn execute(&self, sql: &str, params: &[SqlParam]) -> PipelineResult<ResultSet> {
        if sql.trim().is_empty() {
            return Err(AnalysisError::InvalidQuery);
        }

        let pool = self.pool.clone();
        let sql = sql.to_string();
        let params: Vec<SqlValue> = params.iter().map(SqlValue::from).collect();
        let max_rows = self.max_rows;

        tokio::task::spawn_blocking(move || run_query(&pool, &sql, &params, max_rows))
            .await
            .map_err(|e| AnalysisError::DatabaseError(format!("query task aborted: {}", e)))?
    }
}

fn run_query(
    pool: &Pool<SqliteConnectionManager>,
    sql: &str,
    params: &[SqlValue],
    max_rows: usize,
) -> PipelineResult<ResultSet> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare(sql)?;

    let columns: Vec<String> = stmt
        .column_names()
        .iter()
        .map(|s| s.to_string())
        .collect();

    let mut rows = stmt.query(params_from_iter(params.iter()))?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        if out.len() == max_rows {
            warn!(target: "pipeline", max_rows, "Result truncated at row cap");
            break;
        }
        let mut record = Row::new();
        for (i, name) in columns.iter().enumerate() {
            record.insert(name.clone(), to_json(row.get_ref(i)?));
        }
        out.push(record);
    }

    debug!(target: "pipeline", rows = out.len(), "Query executed");
    Ok(ResultSet { columns, rows: out })
}

fn to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(n) => Value::from(n),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::String(format!("[BLOB {} bytes]", bytes.len())),
    }
}
