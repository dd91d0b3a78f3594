//! Replica lag measurement

use deskline_core::{Connection, QueryResult, Result, Value};

/// Columns reporting lag in seconds, newest server naming first
const LAG_COLUMNS: &[&str] = &["Seconds_Behind_Source", "Seconds_Behind_Master", "lag_seconds"];

/// Outcome of a lag probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicaLag {
    /// Replica reports this many seconds behind its primary
    Seconds(u64),
    /// The query ran but reported no usable figure (replication stopped, or
    /// the server is not a replica)
    Unknown,
}

impl ReplicaLag {
    pub fn exceeds(&self, max_seconds: u64) -> bool {
        matches!(self, ReplicaLag::Seconds(seconds) if *seconds > max_seconds)
    }
}

/// Run `lag_query` on a replica connection and extract its lag.
///
/// Recognises MySQL's `SHOW REPLICA STATUS` / `SHOW SLAVE STATUS` columns,
/// or else takes the first column of the first row.
pub async fn measure_replication_lag(conn: &dyn Connection, lag_query: &str) -> Result<ReplicaLag> {
    let result = conn.query(lag_query, &[]).await?;
    Ok(extract_lag(&result))
}

fn extract_lag(result: &QueryResult) -> ReplicaLag {
    let Some(row) = result.rows.first() else {
        return ReplicaLag::Unknown;
    };

    let value = LAG_COLUMNS
        .iter()
        .find_map(|column| row.get_by_name(column))
        .or_else(|| row.get(0));

    value
        .and_then(Value::as_u64)
        .map(ReplicaLag::Seconds)
        .unwrap_or(ReplicaLag::Unknown)
}
