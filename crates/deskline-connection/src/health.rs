//! Liveness and replication-lag probes
//!
//! The pool maintenance loop pings every idle connection and measures lag
//! on replicas; [`HealthStatus`] classifies the ping latency for
//! diagnostics.
//!
//! # Example
//!
//! ```ignore
//! use deskline_connection::health::{ping_database, HealthStatus};
//!
//! let latency = ping_database(transport.as_ref(), Duration::from_secs(5)).await?;
//! let status = HealthStatus::from_latency(latency);
//! ```

mod lag;
mod ping;
mod status;

#[cfg(test)]
mod tests;

pub use lag::{ReplicaLag, measure_replication_lag};
pub use ping::{PingError, PingResult, ping_database};
pub use status::{HealthStatus, HealthThresholds};
