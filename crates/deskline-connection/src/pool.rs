//! Connection pooling for one logical database
//!
//! A pool keeps four collections of sessions, one per
//! {sync, async} × {primary, replica}. Sessions are created eagerly by
//! [`ConnectionPool::configure`] and kept alive by a maintenance task that
//! pings idle sessions and reconnects broken ones with exponential backoff.
//!
//! # Example
//!
//! ```ignore
//! use deskline_connection::pool::{ConnectionPool, PoolConfig, PoolTargets, RoleLimits};
//!
//! let pool = ConnectionPool::new("ticketing", registry);
//! let config = PoolConfig::new(RoleLimits::new(2, 10, 8), RoleLimits::new(1, 4, 16));
//! pool.configure(config, PoolTargets::new(primary)).await?;
//!
//! let mut conn = pool.acquire(ConnectionRole::Sync, false).await?;
//! let stmt = conn.prepare("ticket.by_id").await?;
//! // Connection returned to pool on drop
//! ```

mod collection;
mod config;
mod maintenance;
mod pool;
mod stats;

#[cfg(test)]
mod tests;

pub use collection::{CollectionKey, PerCollection};
pub use config::{PoolConfig, ReplicaPolicy, RoleLimits};
pub use pool::{AcquireOptions, ConfigureReport, ConnectionPool, PoolTargets, PooledConnection};
pub use stats::{CollectionStats, PoolStats};
