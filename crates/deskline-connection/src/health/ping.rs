//! Database ping implementation

use std::time::{Duration, Instant};

use deskline_core::{Connection, DesklineError};

/// Result of a ping operation
pub type PingResult = Result<Duration, PingError>;

/// Error that can occur during a ping operation
#[derive(Debug, thiserror::Error)]
pub enum PingError {
    #[error("Connection is closed")]
    ConnectionClosed,
    #[error("Ping failed: {0}")]
    Failed(#[source] DesklineError),
    #[error("Ping timed out after {0:?}")]
    Timeout(Duration),
}

impl From<PingError> for DesklineError {
    fn from(err: PingError) -> Self {
        match err {
            PingError::ConnectionClosed => DesklineError::Connection("connection is closed".into()),
            PingError::Failed(inner) => inner,
            PingError::Timeout(after) => DesklineError::Timeout(format!("ping after {after:?}")),
        }
    }
}

/// Ping a connection and return the round-trip time.
///
/// The driver's own liveness probe is used; a probe slower than `timeout`
/// counts as a failure.
pub async fn ping_database(conn: &dyn Connection, timeout: Duration) -> PingResult {
    if conn.is_closed() {
        return Err(PingError::ConnectionClosed);
    }

    let start = Instant::now();
    match tokio::time::timeout(timeout, conn.ping()).await {
        Ok(Ok(())) => Ok(start.elapsed()),
        Ok(Err(e)) => Err(PingError::Failed(e)),
        Err(_) => Err(PingError::Timeout(timeout)),
    }
}
