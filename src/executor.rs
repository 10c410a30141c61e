//! Query execution against a read-only SQLite database

use crate::error::{ExecutionErrorKind, PlannerError, Result};
use crate::result::RowSet;
use async_trait::async_trait;
use rusqlite::types::ValueRef;
use rusqlite::{Connection, ErrorCode, OpenFlags};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy)]
pub struct ExecutionLimits {
    pub row_limit: usize,
    pub timeout: Duration,
}

/// Execution seam. Implementations run one read-only statement and honor
/// the row limit and timeout they are given.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    fn name(&self) -> &str;

    async fn execute(&self, sql: &str, limits: &ExecutionLimits) -> Result<RowSet>;
}

/// Opens a fresh read-only connection per statement
pub struct SqliteExecutor {
    database_path: PathBuf,
    attached: Vec<PathBuf>,
    active: Arc<AtomicUsize>,
}

impl SqliteExecutor {
    pub fn new(database_path: impl Into<PathBuf>, attached: Vec<PathBuf>) -> Self {
        Self {
            database_path: database_path.into(),
            attached,
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn database_path(&self) -> &Path {
        &self.database_path
    }

    /// Statements whose blocking task has not finished yet
    pub fn active_statements(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

/// VM instructions between checks of the cancel flag
const CANCEL_CHECK_OPS: i32 = 1_000;

fn open_read_only(database_path: &Path, attached: &[PathBuf]) -> Result<Connection> {
    let flags = OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_URI | OpenFlags::SQLITE_OPEN_NO_MUTEX;
    let conn = Connection::open_with_flags(database_path, flags).map_err(|e| {
        PlannerError::execution(
            ExecutionErrorKind::Other,
            format!("cannot open {}: {}", database_path.display(), e),
        )
    })?;

    for (i, path) in attached.iter().enumerate() {
        let uri = format!("file:{}?mode=ro", path.display());
        let alias = format!("aux{}", i + 1);
        conn.execute("ATTACH DATABASE ?1 AS ?2", [uri.as_str(), alias.as_str()])
            .map_err(|e| {
                PlannerError::execution(
                    ExecutionErrorKind::Other,
                    format!("cannot attach {}: {}", path.display(), e),
                )
            })?;
        debug!("Attached {} as {}", path.display(), alias);
    }

    conn.pragma_update(None, "query_only", true)?;
    Ok(conn)
}

/// Raises the cancel flag unless disarmed, so a dropped `execute` future
/// does not leave the query running.
struct CancelOnDrop {
    cancelled: Arc<AtomicBool>,
    armed: bool,
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        if self.armed {
            warn!("Query abandoned before completion, interrupting");
            self.cancelled.store(true, Ordering::SeqCst);
        }
    }
}

/// Counts a statement as active for the life of its blocking task
struct ActiveStatement(Arc<AtomicUsize>);

impl ActiveStatement {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter.clone())
    }
}

impl Drop for ActiveStatement {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl QueryExecutor for SqliteExecutor {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn execute(&self, sql: &str, limits: &ExecutionLimits) -> Result<RowSet> {
        let cancelled = Arc::new(AtomicBool::new(false));
        let mut guard = CancelOnDrop {
            cancelled: cancelled.clone(),
            armed: true,
        };

        let database_path = self.database_path.clone();
        let attached = self.attached.clone();
        let active = self.active.clone();
        let flag = cancelled.clone();
        let statement = sql.to_string();
        let row_limit = limits.row_limit;
        let task = tokio::task::spawn_blocking(move || {
            let _active = ActiveStatement::enter(&active);
            if flag.load(Ordering::SeqCst) {
                return Err(PlannerError::execution(ExecutionErrorKind::Cancelled, "cancelled before start"));
            }
            let conn = open_read_only(&database_path, &attached)?;
            // A true return aborts the statement with SQLITE_INTERRUPT.
            conn.progress_handler(CANCEL_CHECK_OPS, Some(move || flag.load(Ordering::SeqCst)));
            run_query(&conn, &statement, row_limit)
        });

        let outcome = tokio::time::timeout(limits.timeout, task).await;
        guard.armed = false;

        match outcome {
            Ok(Ok(rows)) => {
                let rows = rows?;
                info!(
                    "📊 {} rows in {}ms{}",
                    rows.row_count(),
                    rows.execution_time_ms,
                    if rows.truncated { " (truncated)" } else { "" }
                );
                Ok(rows)
            }
            Ok(Err(join_error)) => Err(PlannerError::execution(
                ExecutionErrorKind::Other,
                format!("query task failed: {}", join_error),
            )),
            Err(_) => {
                cancelled.store(true, Ordering::SeqCst);
                warn!("Query exceeded {}ms, interrupted", limits.timeout.as_millis());
                Err(PlannerError::execution(
                    ExecutionErrorKind::Timeout,
                    format!("statement exceeded {}ms", limits.timeout.as_millis()),
                ))
            }
        }
    }
}

fn run_query(conn: &Connection, sql: &str, row_limit: usize) -> Result<RowSet> {
    let started = Instant::now();
    let mut stmt = conn.prepare(sql).map_err(classify_error)?;
    if !stmt.readonly() {
        return Err(PlannerError::UnsafeSql("statement would modify the database".to_string()));
    }

    let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
    let mut rows = stmt.query([]).map_err(classify_error)?;
    let mut out = Vec::new();
    let mut truncated = false;

    while let Some(row) = rows.next().map_err(classify_error)? {
        if out.len() >= row_limit {
            truncated = true;
            break;
        }
        let mut record = Map::with_capacity(columns.len());
        for (i, name) in columns.iter().enumerate() {
            let value = row.get_ref(i).map_err(classify_error)?;
            record.insert(name.clone(), value_to_json(value));
        }
        out.push(record);
    }

    Ok(RowSet {
        columns,
        rows: out,
        truncated,
        execution_time_ms: started.elapsed().as_millis() as u64,
    })
}

fn value_to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::String(format!("<{} bytes>", b.len())),
    }
}

/// Classify a database error message
pub fn classify_message(message: &str) -> ExecutionErrorKind {
    let lowered = message.to_lowercase();

    if lowered.contains("interrupted") {
        return ExecutionErrorKind::Cancelled;
    }
    if lowered.contains("no such table") {
        return ExecutionErrorKind::MissingTable;
    }
    if lowered.contains("no such column") {
        return ExecutionErrorKind::MissingColumn;
    }
    if lowered.contains("syntax error")
        || lowered.contains("incomplete input")
        || lowered.contains("unrecognized token")
    {
        return ExecutionErrorKind::Syntax;
    }
    ExecutionErrorKind::Other
}

fn classify_error(error: rusqlite::Error) -> PlannerError {
    let message = error.to_string();
    let kind = match &error {
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::OperationInterrupted => {
            ExecutionErrorKind::Cancelled
        }
        _ => classify_message(&message),
    };
    PlannerError::execution(kind, message)
}
