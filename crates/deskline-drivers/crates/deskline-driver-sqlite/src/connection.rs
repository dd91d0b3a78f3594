//! SQLite connection implementation

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{Connection as RusqliteConnection, OpenFlags, params_from_iter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use deskline_core::{
    ColumnMeta, Connection, DesklineError, QueryResult, Result, Row, StatementResult, Value,
};

/// How long a statement waits on a locked database before failing
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite connection wrapper
pub struct SqliteConnection {
    conn: Mutex<RusqliteConnection>,
    closed: AtomicBool,
}

impl SqliteConnection {
    /// Open a SQLite database
    pub fn open(path: &str) -> Result<Self> {
        tracing::info!(path = %path, "opening SQLite database");
        // Expand path to handle ~ and relative paths
        let expanded_path = Self::expand_path(path)?;

        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;

        let conn = if path == ":memory:" {
            RusqliteConnection::open_in_memory().map_err(|e| {
                DesklineError::Connection(format!("Failed to open in-memory database: {}", e))
            })?
        } else {
            // Validate that parent directory exists for non-URI paths
            if !expanded_path.starts_with("file:") {
                let file_path = std::path::Path::new(&expanded_path);
                if let Some(parent) = file_path.parent() {
                    if !parent.exists() {
                        return Err(DesklineError::Connection(format!(
                            "Parent directory does not exist: {}",
                            parent.display()
                        )));
                    }
                }
            }

            RusqliteConnection::open_with_flags(&expanded_path, flags).map_err(|e| {
                DesklineError::Connection(format!(
                    "Failed to open SQLite database at '{}': {}",
                    expanded_path, e
                ))
            })?
        };

        // Enable foreign keys (PRAGMA commands return results, so use pragma_update)
        conn.pragma_update(None, "foreign_keys", "ON").map_err(|e| {
            DesklineError::Connection(format!("Failed to enable foreign keys: {}", e))
        })?;

        // Several pooled sessions share one file; WAL lets readers and a writer overlap
        conn.pragma_update(None, "journal_mode", "WAL").map_err(|e| {
            DesklineError::Connection(format!("Failed to set journal mode: {}", e))
        })?;

        conn.pragma_update(None, "synchronous", "NORMAL").map_err(|e| {
            DesklineError::Connection(format!("Failed to set synchronous mode: {}", e))
        })?;

        conn.busy_timeout(BUSY_TIMEOUT).map_err(|e| {
            DesklineError::Connection(format!("Failed to set busy timeout: {}", e))
        })?;

        tracing::info!(path = %expanded_path, "SQLite database connection established");
        Ok(Self {
            conn: Mutex::new(conn),
            closed: AtomicBool::new(false),
        })
    }

    /// Expand path to handle ~ (home directory) and relative paths
    fn expand_path(path: &str) -> Result<String> {
        // Handle special cases
        if path == ":memory:" || path.starts_with("file:") {
            return Ok(path.to_string());
        }

        // Expand ~ to home directory
        let expanded = if let Some(rest) = path.strip_prefix("~/") {
            match dirs::home_dir() {
                Some(home) => home.join(rest).to_string_lossy().to_string(),
                None => {
                    return Err(DesklineError::Configuration(
                        "Unable to determine HOME directory".into(),
                    ));
                }
            }
        } else if path.starts_with('~') {
            return Err(DesklineError::Configuration(
                "User-specific home directories (~user) are not supported".into(),
            ));
        } else {
            path.to_string()
        };

        // Convert to absolute path if relative
        let path_buf = std::path::PathBuf::from(&expanded);
        let result = if path_buf.is_relative() {
            std::env::current_dir()
                .map_err(DesklineError::Io)?
                .join(path_buf)
                .to_string_lossy()
                .to_string()
        } else {
            expanded
        };

        Ok(result)
    }

    /// Execute multiple SQL statements in a batch, e.g. a schema script
    pub async fn execute_batch(&self, sql: &str) -> Result<()> {
        tracing::debug!("executing SQL batch");
        self.ensure_open()?;
        let conn = self.conn.lock();
        conn.execute_batch(sql)
            .map_err(|e| DesklineError::Query(format!("Failed to execute batch: {}", e)))
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(DesklineError::Connection(
                "SQLite connection is closed".into(),
            ));
        }
        Ok(())
    }

    fn run_batch(&self, sql: &str, action: &str) -> Result<()> {
        self.ensure_open()?;
        let conn = self.conn.lock();
        conn.execute_batch(sql)
            .map_err(|e| DesklineError::Query(format!("Failed to {}: {}", action, e)))
    }
}

#[async_trait]
impl Connection for SqliteConnection {
    fn driver_name(&self) -> &str {
        "sqlite"
    }

    #[tracing::instrument(skip(self, sql, params), fields(sql_preview = %sql.chars().take(100).collect::<String>()))]
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<StatementResult> {
        self.ensure_open()?;
        let conn = self.conn.lock();
        let rusqlite_params = values_to_rusqlite(params);

        let rows_affected = conn
            .execute(sql, params_from_iter(rusqlite_params.iter()))
            .map_err(|e| DesklineError::Query(format!("Failed to execute statement: {}", e)))?;

        let last_insert_id = u64::try_from(conn.last_insert_rowid())
            .ok()
            .filter(|id| *id > 0);

        tracing::debug!(affected_rows = rows_affected, "statement executed");
        Ok(StatementResult {
            affected_rows: rows_affected as u64,
            last_insert_id,
        })
    }

    #[tracing::instrument(skip(self, sql, params), fields(sql_preview = %sql.chars().take(100).collect::<String>()))]
    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        let start_time = std::time::Instant::now();

        self.ensure_open()?;
        let conn = self.conn.lock();
        let rusqlite_params = values_to_rusqlite(params);

        let mut stmt = conn
            .prepare(sql)
            .map_err(|e| DesklineError::Query(format!("Failed to prepare query: {}", e)))?;

        let column_count = stmt.column_count();
        let mut column_names: Vec<String> = Vec::with_capacity(column_count);
        let mut columns: Vec<ColumnMeta> = Vec::with_capacity(column_count);

        // decl_type is the type from CREATE TABLE; expressions have none
        for (idx, col) in stmt.columns().iter().enumerate() {
            let name = col.name().to_string();
            let data_type = col.decl_type().unwrap_or("DYNAMIC").to_string();

            column_names.push(name.clone());
            columns.push(ColumnMeta {
                name,
                data_type,
                nullable: true,
                ordinal: idx,
            });
        }

        let mut rows = Vec::new();
        let mut query_rows = stmt
            .query(params_from_iter(rusqlite_params.iter()))
            .map_err(|e| DesklineError::Query(format!("Failed to execute query: {}", e)))?;

        while let Some(row) = query_rows
            .next()
            .map_err(|e| DesklineError::Query(format!("Failed to fetch row: {}", e)))?
        {
            let mut values = Vec::with_capacity(columns.len());
            for i in 0..columns.len() {
                values.push(rusqlite_to_value(row, i)?);
            }
            rows.push(Row::new(column_names.clone(), values));
        }

        let execution_time_ms = start_time.elapsed().as_millis() as u64;
        tracing::debug!(
            row_count = rows.len(),
            execution_time_ms = execution_time_ms,
            "query executed successfully"
        );
        Ok(QueryResult {
            columns,
            rows,
            execution_time_ms,
        })
    }

    async fn prepare(&self, sql: &str) -> Result<()> {
        self.ensure_open()?;
        let conn = self.conn.lock();
        conn.prepare(sql)
            .map(|_| ())
            .map_err(|e| DesklineError::Statement(format!("Invalid statement: {}", e)))
    }

    async fn begin_transaction(&self) -> Result<()> {
        tracing::debug!("beginning SQLite transaction");
        // DEFERRED means the write lock is only acquired when the first write occurs
        self.run_batch("BEGIN DEFERRED", "begin transaction")
    }

    async fn commit(&self) -> Result<()> {
        tracing::debug!("committing SQLite transaction");
        self.run_batch("COMMIT", "commit transaction")
    }

    async fn rollback(&self) -> Result<()> {
        tracing::debug!("rolling back SQLite transaction");
        self.run_batch("ROLLBACK", "rollback transaction")
    }

    async fn ping(&self) -> Result<()> {
        self.ensure_open()?;
        let conn = self.conn.lock();
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .map(|_| ())
            .map_err(|e| DesklineError::Connection(format!("SQLite ping failed: {}", e)))
    }

    async fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            tracing::info!("closing SQLite connection");
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Convert our Value types to rusqlite-compatible types
fn values_to_rusqlite(values: &[Value]) -> Vec<rusqlite::types::Value> {
    values.iter().map(value_to_rusqlite).collect()
}

fn value_to_rusqlite(value: &Value) -> rusqlite::types::Value {
    use rusqlite::types::Value as Sql;

    match value {
        Value::Null => Sql::Null,
        Value::Bool(b) => Sql::Integer(if *b { 1 } else { 0 }),
        Value::Int8(i) => Sql::Integer(*i as i64),
        Value::Int16(i) => Sql::Integer(*i as i64),
        Value::Int32(i) => Sql::Integer(*i as i64),
        Value::Int64(i) => Sql::Integer(*i),
        Value::UInt8(i) => Sql::Integer(*i as i64),
        Value::UInt16(i) => Sql::Integer(*i as i64),
        Value::UInt32(i) => Sql::Integer(*i as i64),
        // SQLite integers are signed 64-bit; larger values survive as text
        Value::UInt64(i) => match i64::try_from(*i) {
            Ok(v) => Sql::Integer(v),
            Err(_) => Sql::Text(i.to_string()),
        },
        Value::Float32(f) => Sql::Real(*f as f64),
        Value::Float64(f) => Sql::Real(*f),
        Value::Decimal(d) => Sql::Text(d.clone()),
        Value::String(s) => Sql::Text(s.clone()),
        Value::Bytes(b) => Sql::Blob(b.clone()),
        Value::Date(d) => Sql::Text(d.to_string()),
        Value::Time(t) => Sql::Text(t.to_string()),
        Value::DateTime(dt) => Sql::Text(dt.to_string()),
        Value::DateTimeUtc(dt) => Sql::Text(dt.to_rfc3339()),
    }
}

/// Convert rusqlite row value to our Value type
fn rusqlite_to_value(row: &rusqlite::Row, idx: usize) -> Result<Value> {
    use rusqlite::types::ValueRef;

    let value_ref = row
        .get_ref(idx)
        .map_err(|e| DesklineError::Query(e.to_string()))?;

    let value = match value_ref {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Int64(i),
        ValueRef::Real(f) => Value::Float64(f),
        ValueRef::Text(s) => Value::String(String::from_utf8_lossy(s).to_string()),
        ValueRef::Blob(b) => Value::Bytes(b.to_vec()),
    };

    Ok(value)
}
