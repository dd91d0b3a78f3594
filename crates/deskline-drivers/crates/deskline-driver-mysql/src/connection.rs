//! MySQL connection implementation

use async_trait::async_trait;
use chrono::{Datelike, Timelike};
use mysql_async::{Conn, Opts, OptsBuilder, Params, Row as MySqlRow, consts::ColumnType, prelude::*};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use deskline_core::{
    ColumnMeta, Connection, DesklineError, QueryResult, Result, Row, StatementResult, Value,
};

/// MySQL connection wrapper.
///
/// Each instance owns exactly one server session. The pool above it decides
/// how many sessions exist, so the driver does not pool on its own.
pub struct MySqlConnection {
    conn: Mutex<Option<Conn>>,
    closed: AtomicBool,
}

impl MySqlConnection {
    /// Connect to a MySQL database
    pub async fn connect(
        host: &str,
        port: u16,
        database: Option<&str>,
        user: Option<&str>,
        password: Option<&str>,
        connect_timeout: Duration,
    ) -> Result<Self> {
        tracing::info!(host = %host, port = %port, database = ?database, "connecting to MySQL database");

        let mut opts_builder = OptsBuilder::from_opts(Opts::default())
            .ip_or_hostname(host)
            .tcp_port(port);

        if let Some(db) = database {
            opts_builder = opts_builder.db_name(Some(db));
        }
        if let Some(u) = user {
            opts_builder = opts_builder.user(Some(u));
        }
        if let Some(p) = password {
            opts_builder = opts_builder.pass(Some(p));
        }

        let conn = tokio::time::timeout(connect_timeout, Conn::new(opts_builder))
            .await
            .map_err(|_| {
                DesklineError::Timeout(format!(
                    "MySQL connection to {}:{} timed out after {:?}",
                    host, port, connect_timeout
                ))
            })?
            .map_err(|e| DesklineError::Connection(format!("Failed to connect to MySQL: {}", e)))?;

        tracing::info!(host = %host, port = %port, "MySQL connection established");
        Ok(Self {
            conn: Mutex::new(Some(conn)),
            closed: AtomicBool::new(false),
        })
    }
}

/// Server-side failures are statement errors; everything else means the
/// session itself is in trouble.
fn map_mysql_error(e: mysql_async::Error, action: &str) -> DesklineError {
    match e {
        mysql_async::Error::Server(err) => {
            DesklineError::Query(format!("Failed to {}: {}", action, err))
        }
        other => DesklineError::Connection(format!("Failed to {}: {}", action, other)),
    }
}

fn closed_error() -> DesklineError {
    DesklineError::Connection("MySQL connection is closed".into())
}

/// Bind our values as native positional parameters
fn values_to_params(values: &[Value]) -> Params {
    if values.is_empty() {
        Params::Empty
    } else {
        Params::Positional(values.iter().map(value_to_mysql).collect())
    }
}

fn value_to_mysql(value: &Value) -> mysql_async::Value {
    use mysql_async::Value as My;

    match value {
        Value::Null => My::NULL,
        Value::Bool(v) => My::Int(*v as i64),
        Value::Int8(v) => My::Int(*v as i64),
        Value::Int16(v) => My::Int(*v as i64),
        Value::Int32(v) => My::Int(*v as i64),
        Value::Int64(v) => My::Int(*v),
        Value::UInt8(v) => My::UInt(*v as u64),
        Value::UInt16(v) => My::UInt(*v as u64),
        Value::UInt32(v) => My::UInt(*v as u64),
        Value::UInt64(v) => My::UInt(*v),
        Value::Float32(v) => My::Float(*v),
        Value::Float64(v) => My::Double(*v),
        Value::Decimal(v) | Value::String(v) => My::Bytes(v.as_bytes().to_vec()),
        Value::Bytes(v) => My::Bytes(v.clone()),
        Value::Date(d) => My::Date(d.year() as u16, d.month() as u8, d.day() as u8, 0, 0, 0, 0),
        Value::Time(t) => My::Time(
            false,
            0,
            t.hour() as u8,
            t.minute() as u8,
            t.second() as u8,
            t.nanosecond() / 1_000,
        ),
        Value::DateTime(dt) => naive_to_mysql(dt),
        Value::DateTimeUtc(dt) => naive_to_mysql(&dt.naive_utc()),
    }
}

fn naive_to_mysql(dt: &chrono::NaiveDateTime) -> mysql_async::Value {
    mysql_async::Value::Date(
        dt.year() as u16,
        dt.month() as u8,
        dt.day() as u8,
        dt.hour() as u8,
        dt.minute() as u8,
        dt.second() as u8,
        dt.nanosecond() / 1_000,
    )
}

/// Convert mysql_async Value to our Value type, using column type metadata
/// to correctly interpret byte strings from the text protocol.
fn mysql_value_to_value(val: mysql_async::Value, col_type: ColumnType) -> Value {
    match val {
        mysql_async::Value::NULL => Value::Null,
        mysql_async::Value::Bytes(bytes) => match String::from_utf8(bytes) {
            Ok(s) => match col_type {
                ColumnType::MYSQL_TYPE_TINY
                | ColumnType::MYSQL_TYPE_SHORT
                | ColumnType::MYSQL_TYPE_LONG
                | ColumnType::MYSQL_TYPE_LONGLONG
                | ColumnType::MYSQL_TYPE_INT24
                | ColumnType::MYSQL_TYPE_YEAR => {
                    s.parse::<i64>().map(Value::Int64).unwrap_or(Value::String(s))
                }
                ColumnType::MYSQL_TYPE_FLOAT => {
                    s.parse::<f32>().map(Value::Float32).unwrap_or(Value::String(s))
                }
                ColumnType::MYSQL_TYPE_DOUBLE => {
                    s.parse::<f64>().map(Value::Float64).unwrap_or(Value::String(s))
                }
                ColumnType::MYSQL_TYPE_DECIMAL | ColumnType::MYSQL_TYPE_NEWDECIMAL => {
                    Value::Decimal(s)
                }
                ColumnType::MYSQL_TYPE_TINY_BLOB
                | ColumnType::MYSQL_TYPE_MEDIUM_BLOB
                | ColumnType::MYSQL_TYPE_LONG_BLOB
                | ColumnType::MYSQL_TYPE_BLOB => Value::Bytes(s.into_bytes()),
                _ => Value::String(s),
            },
            Err(e) => Value::Bytes(e.into_bytes()),
        },
        mysql_async::Value::Int(i) => Value::Int64(i),
        mysql_async::Value::UInt(u) => Value::UInt64(u),
        mysql_async::Value::Float(f) => Value::Float32(f),
        mysql_async::Value::Double(d) => Value::Float64(d),
        mysql_async::Value::Date(year, month, day, hour, min, sec, micro) => {
            let date = chrono::NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32);
            let is_date_column = col_type == ColumnType::MYSQL_TYPE_DATE;
            match date {
                Some(date) if is_date_column => Value::Date(date),
                Some(date) => date
                    .and_hms_micro_opt(hour as u32, min as u32, sec as u32, micro)
                    .map(Value::DateTime)
                    .unwrap_or(Value::Date(date)),
                // Zero dates ('0000-00-00') have no chrono representation
                None => Value::String(format!(
                    "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
                    year, month, day, hour, min, sec
                )),
            }
        }
        mysql_async::Value::Time(negative, days, hours, mins, secs, micros) => {
            let total_hours = days * 24 + hours as u32;
            let sign = if negative { "-" } else { "" };
            Value::String(format!(
                "{}{:02}:{:02}:{:02}.{:06}",
                sign, total_hours, mins, secs, micros
            ))
        }
    }
}

fn rows_to_result(mysql_rows: Vec<MySqlRow>) -> (Vec<ColumnMeta>, Vec<Row>) {
    let mut columns = Vec::new();
    let mut column_names = Vec::new();
    let mut column_types = Vec::new();

    if let Some(first_row) = mysql_rows.first() {
        for (idx, col) in first_row.columns_ref().iter().enumerate() {
            let name = col.name_str().to_string();
            column_names.push(name.clone());
            column_types.push(col.column_type());
            columns.push(ColumnMeta {
                name,
                data_type: format!("{:?}", col.column_type()),
                nullable: true,
                ordinal: idx,
            });
        }
    }

    let mut rows = Vec::with_capacity(mysql_rows.len());
    for mysql_row in mysql_rows {
        let mut values = Vec::with_capacity(columns.len());
        for idx in 0..columns.len() {
            let mysql_val: mysql_async::Value =
                mysql_row.get(idx).unwrap_or(mysql_async::Value::NULL);
            let col_type = column_types
                .get(idx)
                .copied()
                .unwrap_or(ColumnType::MYSQL_TYPE_STRING);
            values.push(mysql_value_to_value(mysql_val, col_type));
        }
        rows.push(Row::new(column_names.clone(), values));
    }

    (columns, rows)
}

#[async_trait]
impl Connection for MySqlConnection {
    fn driver_name(&self) -> &str {
        "mysql"
    }

    #[tracing::instrument(skip(self, sql, params), fields(sql_preview = %sql.chars().take(100).collect::<String>()))]
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<StatementResult> {
        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or_else(closed_error)?;

        // Text protocol for parameterless statements: transaction control
        // and DDL are not all preparable
        let outcome = if params.is_empty() {
            conn.query_drop(sql).await
        } else {
            conn.exec_drop(sql, values_to_params(params)).await
        };
        outcome.map_err(|e| map_mysql_error(e, "execute statement"))?;

        let affected_rows = conn.affected_rows();
        tracing::debug!(affected_rows = affected_rows, "statement executed");
        Ok(StatementResult {
            affected_rows,
            last_insert_id: conn.last_insert_id(),
        })
    }

    #[tracing::instrument(skip(self, sql, params), fields(sql_preview = %sql.chars().take(100).collect::<String>()))]
    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        let start_time = std::time::Instant::now();
        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or_else(closed_error)?;

        let mysql_rows: Vec<MySqlRow> = if params.is_empty() {
            conn.query::<MySqlRow, _>(sql).await
        } else {
            conn.exec::<MySqlRow, _, _>(sql, values_to_params(params)).await
        }
        .map_err(|e| map_mysql_error(e, "execute query"))?;

        let (columns, rows) = rows_to_result(mysql_rows);
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
        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or_else(closed_error)?;

        let statement = conn.prep(sql).await.map_err(|e| match e {
            mysql_async::Error::Server(err) => {
                DesklineError::Statement(format!("Invalid statement: {}", err))
            }
            other => map_mysql_error(other, "prepare statement"),
        })?;
        conn.close(statement)
            .await
            .map_err(|e| map_mysql_error(e, "close prepared statement"))
    }

    async fn begin_transaction(&self) -> Result<()> {
        tracing::debug!("beginning MySQL transaction");
        self.execute("START TRANSACTION", &[]).await.map(|_| ())
    }

    async fn ping(&self) -> Result<()> {
        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or_else(closed_error)?;
        conn.ping()
            .await
            .map_err(|e| DesklineError::Connection(format!("MySQL ping failed: {}", e)))
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        let conn = self.conn.lock().await.take();
        if let Some(conn) = conn {
            tracing::info!("closing MySQL connection");
            conn.disconnect()
                .await
                .map_err(|e| DesklineError::Connection(format!("Failed to close MySQL connection: {}", e)))?;
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
