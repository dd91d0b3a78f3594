//! Deskline Connection - pooled, tunnelled database sessions
//!
//! This crate owns the runtime side of database access: connection pools per
//! logical database, the async job executor, SSH tunnels and the
//! [`AppContext`] that ties them together at startup.

mod config;
mod connection;
mod context;
pub mod executor;
pub mod health;
mod manager;
pub mod pool;
pub mod reconnect;
pub mod tunnel;
mod validator;

pub use config::{DatabaseSettings, DesklineSettings, EndpointSettings};
pub use connection::{DbConnection, Endpoint, StatementHandle};
pub use context::AppContext;
pub use executor::{AsyncExecutor, Task};
pub use health::{HealthStatus, HealthThresholds, PingError, PingResult, ReplicaLag, ping_database};
pub use manager::{DatabaseManager, Diagnostics};
pub use pool::{
    AcquireOptions, CollectionKey, CollectionStats, ConfigureReport, ConnectionPool, PerCollection,
    PoolConfig, PoolStats, PoolTargets, PooledConnection, ReplicaPolicy, RoleLimits,
};
pub use reconnect::BackoffStrategy;
pub use tunnel::{SshTunnel, SshTunnelError, TunnelState};
pub use validator::{StatementOutcome, ValidationReport, validate_statements};

pub use tokio_util::sync::CancellationToken;
