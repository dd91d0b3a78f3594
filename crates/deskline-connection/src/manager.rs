//! Per-database façade over a connection pool

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use deskline_core::{ConnectionRole, DesklineError, LogicalDatabase, Result, StatementRegistry};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::health::{HealthStatus, ping_database};
use crate::pool::{
    AcquireOptions, CollectionStats, ConfigureReport, ConnectionPool, PerCollection, PoolConfig,
    PoolTargets, PooledConnection,
};

/// Bound on acquiring and pinging during a health check
const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// Point-in-time view of one logical database, for logs and health endpoints
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostics {
    pub database: LogicalDatabase,
    pub collections: PerCollection<CollectionStats>,
    /// Acquirers currently waiting for a release
    pub waiting: usize,
    /// Async jobs not yet started
    pub queued_jobs: usize,
    /// Registered statements in this database's id range
    pub statements: usize,
    pub closed: bool,
}

impl Diagnostics {
    /// Emit the snapshot as one structured log event
    pub fn log(&self) {
        let c = &self.collections;
        tracing::info!(
            database = %self.database,
            sync_primary_idle = c.sync_primary.idle,
            sync_primary_in_use = c.sync_primary.in_use,
            sync_replica_idle = c.sync_replica.idle,
            sync_replica_in_use = c.sync_replica.in_use,
            async_primary_idle = c.async_primary.idle,
            async_primary_in_use = c.async_primary.in_use,
            async_replica_idle = c.async_replica.idle,
            async_replica_in_use = c.async_replica.in_use,
            broken = c.iter().map(|(_, stats)| stats.broken).sum::<usize>(),
            waiting = self.waiting,
            queued_jobs = self.queued_jobs,
            statements = self.statements,
            "database diagnostics"
        );
    }
}

/// Binds one pool to a logical database
#[derive(Debug, Clone)]
pub struct DatabaseManager {
    database: LogicalDatabase,
    pool: ConnectionPool,
}

impl DatabaseManager {
    /// Create a manager with an empty pool; call [`DatabaseManager::configure`]
    /// before acquiring. Must be called from within a Tokio runtime.
    pub fn new(database: LogicalDatabase, registry: Arc<StatementRegistry>) -> Self {
        Self {
            database,
            pool: ConnectionPool::new(database.as_str(), registry),
        }
    }

    pub fn database(&self) -> LogicalDatabase {
        self.database
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    pub fn registry(&self) -> &Arc<StatementRegistry> {
        self.pool.registry()
    }

    pub async fn configure(&self, config: PoolConfig, targets: PoolTargets) -> Result<ConfigureReport> {
        self.pool.configure(config, targets).await
    }

    pub async fn acquire(&self, role: ConnectionRole, prefer_replica: bool) -> Result<PooledConnection> {
        self.pool.acquire(role, prefer_replica).await
    }

    pub async fn acquire_with(
        &self,
        role: ConnectionRole,
        prefer_replica: bool,
        options: AcquireOptions,
    ) -> Result<PooledConnection> {
        self.pool.acquire_with(role, prefer_replica, options).await
    }

    pub async fn submit_async<F, Fut>(&self, role: ConnectionRole, prefer_replica: bool, task: F) -> CancellationToken
    where
        F: FnOnce(PooledConnection) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.pool.submit_async(role, prefer_replica, task).await
    }

    pub fn diagnostics(&self) -> Diagnostics {
        let stats = self.pool.stats();
        Diagnostics {
            database: self.database,
            collections: stats.collections,
            waiting: stats.waiting,
            queued_jobs: stats.queued_jobs,
            statements: self.registry().count_for(self.database),
            closed: stats.closed,
        }
    }

    /// Acquire a sync connection and ping it.
    ///
    /// Fails when no connection can be obtained in time or the ping fails;
    /// otherwise grades the round trip.
    #[tracing::instrument(skip(self), fields(database = %self.database))]
    pub async fn health_check(&self) -> Result<HealthStatus> {
        let conn = self
            .pool
            .acquire_with(
                ConnectionRole::Sync,
                false,
                AcquireOptions::timeout(HEALTH_CHECK_TIMEOUT),
            )
            .await?;

        let transport = conn.raw_transport().ok_or_else(|| {
            DesklineError::Connection(format!("{} connection {} is not open", self.database, conn.id()))
        })?;
        let latency = ping_database(transport.as_ref(), HEALTH_CHECK_TIMEOUT).await?;
        let status = HealthStatus::from_latency(latency);

        tracing::debug!(
            conn_id = conn.id(),
            replica = conn.is_replica(),
            latency_ms = latency.as_millis() as u64,
            %status,
            "health check passed"
        );
        Ok(status)
    }

    pub async fn shutdown(&self) {
        self.pool.shutdown().await;
    }
}
