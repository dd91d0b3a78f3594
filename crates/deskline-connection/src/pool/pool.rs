//! Connection pool implementation

use std::collections::VecDeque;
use std::future::Future;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use deskline_core::{ConnectionRole, DesklineError, Result, StatementRegistry};
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::collection::{CollectionKey, PerCollection};
use super::config::PoolConfig;
use super::maintenance;
use super::stats::{CollectionStats, PoolStats};
use crate::connection::{DbConnection, Endpoint};
use crate::executor::AsyncExecutor;

/// Primary and optional replica endpoint of one logical database
#[derive(Debug, Clone)]
pub struct PoolTargets {
    pub primary: Endpoint,
    pub replica: Option<Endpoint>,
}

impl PoolTargets {
    pub fn new(primary: Endpoint) -> Self {
        Self {
            primary,
            replica: None,
        }
    }

    pub fn with_replica(mut self, replica: Endpoint) -> Self {
        self.replica = Some(replica);
        self
    }
}

/// Connections created by [`ConnectionPool::configure`], per collection
pub type ConfigureReport = PerCollection<usize>;

/// Bounds for a single acquire
#[derive(Debug, Clone, Default)]
pub struct AcquireOptions {
    /// Give up with [`DesklineError::Timeout`] at this instant
    pub deadline: Option<Instant>,
    /// Give up with [`DesklineError::Cancelled`] once this fires
    pub cancel: Option<CancellationToken>,
}

impl AcquireOptions {
    pub fn timeout(timeout: Duration) -> Self {
        Self {
            deadline: Some(Instant::now() + timeout),
            cancel: None,
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

#[derive(Default)]
pub(super) struct Collection {
    pub(super) idle: VecDeque<DbConnection>,
    pub(super) broken: Vec<DbConnection>,
    pub(super) checked_out: usize,
    pub(super) maintaining: usize,
}

impl Collection {
    fn owned(&self) -> usize {
        self.idle.len() + self.broken.len() + self.checked_out + self.maintaining
    }

    fn stats(&self) -> CollectionStats {
        CollectionStats {
            total: self.owned(),
            idle: self.idle.len(),
            in_use: self.checked_out,
            broken: self.broken.len(),
            maintaining: self.maintaining,
        }
    }

    fn drain(&mut self) -> Vec<DbConnection> {
        let mut drained: Vec<DbConnection> = self.idle.drain(..).collect();
        drained.append(&mut self.broken);
        drained
    }
}

pub(super) struct PoolState {
    pub(super) config: PoolConfig,
    pub(super) collections: PerCollection<Collection>,
    pub(super) generation: u64,
    pub(super) closed: bool,
    waiting: usize,
    maintenance: Option<(CancellationToken, JoinHandle<()>)>,
}

impl PoolState {
    /// Collections an acquire may draw from, in preference order
    fn candidates(&self, role: ConnectionRole, prefer_replica: bool) -> Vec<CollectionKey> {
        let primary = CollectionKey::new(role, false);
        let replica = CollectionKey::new(role, true);
        if prefer_replica {
            vec![replica, primary]
        } else if self.config.replica().read_fallback {
            vec![primary, replica]
        } else {
            vec![primary]
        }
    }

    fn take_idle(&mut self, candidates: &[CollectionKey]) -> Option<DbConnection> {
        for key in candidates {
            let collection = self.collections.get_mut(*key);
            if let Some(conn) = collection.idle.pop_front() {
                collection.checked_out += 1;
                return Some(conn);
            }
        }
        None
    }

    fn drain_all(&mut self) -> Vec<DbConnection> {
        let mut drained = Vec::new();
        for key in CollectionKey::ALL {
            drained.extend(self.collections.get_mut(key).drain());
        }
        self.collections = PerCollection::default();
        drained
    }
}

pub(super) struct PoolInner {
    pub(super) name: String,
    pub(super) registry: Arc<StatementRegistry>,
    pub(super) state: Mutex<PoolState>,
    /// Fires whenever a connection becomes idle or the pool changes shape
    pub(super) released: Notify,
    executor: AsyncExecutor,
    next_conn_id: AtomicU64,
    /// Serialises configure and shutdown
    lifecycle: tokio::sync::Mutex<()>,
}

impl PoolInner {
    /// Return a checked-out connection to its collection.
    pub(super) fn release(&self, conn: DbConnection, generation: u64) {
        let key = CollectionKey::new(conn.role(), conn.is_replica());
        let mut state = self.state.lock();

        if state.closed || state.generation != generation {
            drop(state);
            tracing::debug!(pool = %self.name, conn_id = conn.id(), "discarding connection from previous configuration");
            dispose(conn);
            return;
        }

        let collection = state.collections.get_mut(key);
        collection.checked_out = collection.checked_out.saturating_sub(1);
        if conn.is_connected() {
            collection.idle.push_back(conn);
        } else {
            tracing::info!(pool = %self.name, conn_id = conn.id(), collection = %key, "connection returned broken, parking for maintenance");
            collection.broken.push(conn);
        }
        drop(state);
        self.released.notify_waiters();
    }

    /// Forget a checked-out connection that could not be returned.
    fn forget(&self, key: CollectionKey, generation: u64) {
        let mut state = self.state.lock();
        if !state.closed && state.generation == generation {
            let collection = state.collections.get_mut(key);
            collection.checked_out = collection.checked_out.saturating_sub(1);
        }
    }

    fn next_id(&self) -> u64 {
        self.next_conn_id.fetch_add(1, Ordering::Relaxed)
    }
}

impl Drop for PoolInner {
    fn drop(&mut self) {
        if let Some((token, _)) = self.state.get_mut().maintenance.take() {
            token.cancel();
        }
    }
}

/// Disconnect a connection in the background when a runtime is available;
/// otherwise dropping it closes the transport and stops its tunnel.
pub(super) fn dispose(mut conn: DbConnection) {
    if let Ok(handle) = tokio::runtime::Handle::try_current() {
        handle.spawn(async move { conn.disconnect().await });
    }
}

/// Decrements the waiter count even when the acquiring future is dropped
struct WaitingGuard<'a> {
    state: &'a Mutex<PoolState>,
}

impl Drop for WaitingGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        state.waiting = state.waiting.saturating_sub(1);
    }
}

enum WakeReason {
    Released,
    TimedOut,
    Cancelled,
}

/// Pool of database sessions for one logical database
///
/// Owns four collections, {sync, async} × {primary, replica}, a
/// maintenance task that pings and reconnects idle sessions, and an
/// executor for async jobs. Cloning is cheap and shares the pool.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("name", &self.inner.name)
            .field("stats", &self.stats())
            .finish()
    }
}

impl ConnectionPool {
    /// Create an empty pool. Must be called from within a Tokio runtime.
    pub fn new(name: impl Into<String>, registry: Arc<StatementRegistry>) -> Self {
        let name = name.into();
        let executor = AsyncExecutor::new(name.clone());
        Self {
            inner: Arc::new(PoolInner {
                name,
                registry,
                state: Mutex::new(PoolState {
                    config: PoolConfig::default(),
                    collections: PerCollection::default(),
                    generation: 0,
                    closed: false,
                    waiting: 0,
                    maintenance: None,
                }),
                released: Notify::new(),
                executor,
                next_conn_id: AtomicU64::new(1),
                lifecycle: tokio::sync::Mutex::new(()),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn registry(&self) -> &Arc<StatementRegistry> {
        &self.inner.registry
    }

    /// Current configuration
    pub fn config(&self) -> PoolConfig {
        self.inner.state.lock().config.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    /// Apply a configuration, replacing every existing connection.
    ///
    /// Connections checked out under the previous configuration are
    /// discarded when returned. An inactive primary is logged and leaves the
    /// pool empty; individual connection failures are logged and skipped.
    #[tracing::instrument(skip(self, config, targets), fields(pool = %self.inner.name))]
    pub async fn configure(&self, config: PoolConfig, targets: PoolTargets) -> Result<ConfigureReport> {
        config.validate()?;
        let _lifecycle = self.inner.lifecycle.lock().await;

        let (old_connections, old_maintenance, generation) = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return Err(DesklineError::PoolClosed);
            }
            state.generation += 1;
            state.config = config.clone();
            (state.drain_all(), state.maintenance.take(), state.generation)
        };
        // Waiters re-check eligibility against the new, still empty, pool
        self.inner.released.notify_waiters();

        stop_maintenance(old_maintenance).await;
        for mut conn in old_connections {
            conn.disconnect().await;
        }

        let primary = Arc::new(targets.primary);
        let replica = targets.replica.map(Arc::new);
        let mut created: PerCollection<Vec<DbConnection>> = PerCollection::default();

        if primary.active {
            for role in ConnectionRole::ALL {
                let key = CollectionKey::new(role, false);
                *created.get_mut(key) = self.open_connections(key, &primary, config.limits(role).min_size()).await;
            }
        } else {
            tracing::error!(endpoint = %primary.label, "primary endpoint is inactive, pool left without connections");
        }

        match &replica {
            Some(replica) if config.replica().enabled && replica.active => {
                for role in ConnectionRole::ALL {
                    let key = CollectionKey::new(role, true);
                    *created.get_mut(key) = self.open_connections(key, replica, config.limits(role).min_size()).await;
                }
            }
            Some(replica) if config.replica().enabled => {
                tracing::info!(endpoint = %replica.label, "replica endpoint is inactive, reads stay on the primary");
            }
            None if config.replica().enabled => {
                tracing::warn!("replica usage is enabled but no replica endpoint is configured");
            }
            _ => {}
        }

        let report = created.map(|_, connections| connections.len());

        let stale = {
            let mut state = self.inner.state.lock();
            if state.closed || state.generation != generation {
                Some(created)
            } else {
                for key in CollectionKey::ALL {
                    let connections = std::mem::take(created.get_mut(key));
                    state.collections.get_mut(key).idle.extend(connections);
                }
                let token = CancellationToken::new();
                let handle = maintenance::spawn(Arc::downgrade(&self.inner), token.clone(), config.ping_interval());
                state.maintenance = Some((token, handle));
                None
            }
        };

        if let Some(mut stale) = stale {
            for key in CollectionKey::ALL {
                for mut conn in std::mem::take(stale.get_mut(key)) {
                    conn.disconnect().await;
                }
            }
            return Err(DesklineError::PoolClosed);
        }

        self.inner.released.notify_waiters();
        tracing::info!(
            sync_primary = report.sync_primary,
            sync_replica = report.sync_replica,
            async_primary = report.async_primary,
            async_replica = report.async_replica,
            "pool configured"
        );
        Ok(report)
    }

    async fn open_connections(&self, key: CollectionKey, endpoint: &Arc<Endpoint>, count: usize) -> Vec<DbConnection> {
        let mut opened = Vec::with_capacity(count);
        for _ in 0..count {
            let mut conn = DbConnection::new(
                self.inner.next_id(),
                key.role,
                key.replica,
                endpoint.clone(),
                self.inner.registry.clone(),
            );
            match conn.connect().await {
                Ok(()) => opened.push(conn),
                Err(e) => {
                    tracing::warn!(collection = %key, endpoint = %endpoint.label, error = %e, "failed to create pooled connection");
                }
            }
        }
        opened
    }

    /// Acquire a connection, waiting for a release when none is idle.
    ///
    /// Waits at most the configured `acquire_timeout_ms`, if any.
    pub async fn acquire(&self, role: ConnectionRole, prefer_replica: bool) -> Result<PooledConnection> {
        self.acquire_with(role, prefer_replica, AcquireOptions::default()).await
    }

    /// Acquire a connection with an explicit deadline and/or cancellation.
    ///
    /// Prefers an idle replica when `prefer_replica`, then an idle primary,
    /// then (with `read_fallback`) an idle replica. Fails fast with
    /// [`DesklineError::NoConnections`] when the role has no connection in
    /// any eligible collection, and with [`DesklineError::PoolClosed`] once
    /// the pool is shut down.
    #[tracing::instrument(skip(self, options), fields(pool = %self.inner.name, role = %role))]
    pub async fn acquire_with(
        &self,
        role: ConnectionRole,
        prefer_replica: bool,
        options: AcquireOptions,
    ) -> Result<PooledConnection> {
        let deadline = options
            .deadline
            .or_else(|| self.config().acquire_timeout().map(|timeout| Instant::now() + timeout));

        loop {
            let notified = self.inner.released.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let _waiting = {
                let mut state = self.inner.state.lock();
                if state.closed {
                    return Err(DesklineError::PoolClosed);
                }

                let candidates = state.candidates(role, prefer_replica);
                if let Some(conn) = state.take_idle(&candidates) {
                    let generation = state.generation;
                    drop(state);
                    tracing::trace!(conn_id = conn.id(), replica = conn.is_replica(), "connection acquired");
                    return Ok(PooledConnection::new(conn, self.inner.clone(), generation));
                }

                let eligible = candidates
                    .iter()
                    .any(|key| state.collections.get(*key).owned() > 0);
                if !eligible {
                    return Err(DesklineError::NoConnections(format!(
                        "pool '{}' has no {} connections",
                        self.inner.name, role
                    )));
                }

                state.waiting += 1;
                WaitingGuard {
                    state: &self.inner.state,
                }
            };

            let reason = wait_for_release(notified, deadline, options.cancel.as_ref()).await;
            match reason {
                WakeReason::Released => continue,
                WakeReason::TimedOut => {
                    return Err(DesklineError::Timeout(format!(
                        "no {} connection became available in pool '{}'",
                        role, self.inner.name
                    )));
                }
                WakeReason::Cancelled => return Err(DesklineError::Cancelled),
            }
        }
    }

    /// Run `task` on the async executor with a connection of `role`.
    ///
    /// The job acquires, runs and releases; submission waits while the
    /// executor already holds the role's `max_queue_depth` jobs. The returned
    /// token withdraws the job if it has not started yet.
    pub async fn submit_async<F, Fut>(&self, role: ConnectionRole, prefer_replica: bool, task: F) -> CancellationToken
    where
        F: FnOnce(PooledConnection) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let depth = self.config().limits(role).max_queue_depth();
        let pool = self.clone();
        self.inner
            .executor
            .submit(
                async move {
                    let conn = pool.acquire(role, prefer_replica).await?;
                    task(conn).await
                },
                depth,
            )
            .await
    }

    /// Snapshot of every collection plus waiters and queued jobs
    pub fn stats(&self) -> PoolStats {
        let state = self.inner.state.lock();
        PoolStats {
            collections: state.collections.map(|_, collection| collection.stats()),
            waiting: state.waiting,
            queued_jobs: self.inner.executor.queue_size(),
            generation: state.generation,
            closed: state.closed,
        }
    }

    /// Stop maintenance and the executor, disconnect every idle connection
    /// and fail all waiters with [`DesklineError::PoolClosed`]. Idempotent.
    #[tracing::instrument(skip(self), fields(pool = %self.inner.name))]
    pub async fn shutdown(&self) {
        let _lifecycle = self.inner.lifecycle.lock().await;

        let (connections, maintenance) = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            state.generation += 1;
            (state.drain_all(), state.maintenance.take())
        };
        self.inner.released.notify_waiters();

        stop_maintenance(maintenance).await;
        self.inner.executor.stop();

        let count = connections.len();
        for mut conn in connections {
            conn.disconnect().await;
        }
        tracing::info!(disconnected = count, "pool shut down");
    }
}

async fn stop_maintenance(maintenance: Option<(CancellationToken, JoinHandle<()>)>) {
    if let Some((token, handle)) = maintenance {
        token.cancel();
        if let Err(e) = handle.await {
            if e.is_panic() {
                tracing::error!(error = %e, "pool maintenance task panicked");
            }
        }
    }
}

async fn wait_for_release(
    notified: std::pin::Pin<&mut tokio::sync::futures::Notified<'_>>,
    deadline: Option<Instant>,
    cancel: Option<&CancellationToken>,
) -> WakeReason {
    let timeout = async {
        match deadline {
            Some(deadline) => tokio::time::sleep_until(deadline).await,
            None => std::future::pending().await,
        }
    };
    let cancelled = async {
        match cancel {
            Some(token) => token.cancelled().await,
            None => std::future::pending().await,
        }
    };

    tokio::select! {
        _ = notified => WakeReason::Released,
        _ = timeout => WakeReason::TimedOut,
        _ = cancelled => WakeReason::Cancelled,
    }
}

/// A connection checked out of a [`ConnectionPool`]
///
/// Dereferences to [`DbConnection`]. Dropping the handle returns the
/// connection; one left inside a transaction is rolled back first.
pub struct PooledConnection {
    conn: Option<DbConnection>,
    pool: Arc<PoolInner>,
    generation: u64,
}

impl PooledConnection {
    fn new(conn: DbConnection, pool: Arc<PoolInner>, generation: u64) -> Self {
        Self {
            conn: Some(conn),
            pool,
            generation,
        }
    }
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("pool", &self.pool.name)
            .field("conn", &self.conn)
            .finish()
    }
}

impl Deref for PooledConnection {
    type Target = DbConnection;

    fn deref(&self) -> &Self::Target {
        self.conn.as_ref().expect("connection taken")
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn.as_mut().expect("connection taken")
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let Some(mut conn) = self.conn.take() else {
            return;
        };

        if !conn.in_transaction() {
            self.pool.release(conn, self.generation);
            return;
        }

        let key = CollectionKey::new(conn.role(), conn.is_replica());
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let pool = self.pool.clone();
                let generation = self.generation;
                handle.spawn(async move {
                    tracing::warn!(pool = %pool.name, conn_id = conn.id(), "connection returned inside a transaction, rolling back");
                    if let Err(e) = conn.rollback().await {
                        tracing::warn!(pool = %pool.name, conn_id = conn.id(), error = %e, "rollback on release failed");
                        conn.disconnect().await;
                    }
                    pool.release(conn, generation);
                });
            }
            Err(_) => {
                tracing::warn!(pool = %self.pool.name, conn_id = conn.id(), "no runtime to roll back open transaction, dropping connection");
                self.pool.forget(key, self.generation);
            }
        }
    }
}
