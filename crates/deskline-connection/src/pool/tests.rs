//! Tests for connection pool functionality

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use deskline_core::{
    Connection, ConnectionConfig, ConnectionRole, DatabaseDriver, DesklineError, QueryResult,
    Result, RoleAffinity, Row, StatementRegistry, StatementResult, Value,
};
use indoc::indoc;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use tokio_util::sync::CancellationToken;

use super::*;
use crate::connection::Endpoint;

/// Shared state of one fake database server
#[derive(Default)]
struct MockServer {
    opened: AtomicUsize,
    refuse: AtomicBool,
    ping_fails: AtomicBool,
    lag_seconds: AtomicU64,
    lag_fails: AtomicBool,
    log: Mutex<Vec<String>>,
    sessions: Mutex<Vec<Arc<MockConnection>>>,
}

impl MockServer {
    fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// Simulate the server dropping every open session
    fn kill_sessions(&self) {
        for session in self.sessions.lock().iter() {
            session.closed.store(true, Ordering::SeqCst);
        }
    }

    fn executed(&self, sql: &str) -> bool {
        self.log.lock().iter().any(|entry| entry == sql)
    }

    fn times_executed(&self, sql: &str) -> usize {
        self.log.lock().iter().filter(|entry| *entry == sql).count()
    }
}

/// Mock connection for testing
struct MockConnection {
    server: Arc<MockServer>,
    closed: AtomicBool,
}

#[async_trait]
impl Connection for MockConnection {
    fn driver_name(&self) -> &str {
        "mock"
    }

    async fn execute(&self, sql: &str, _params: &[Value]) -> Result<StatementResult> {
        self.server.log.lock().push(sql.to_string());
        Ok(StatementResult {
            affected_rows: 1,
            last_insert_id: None,
        })
    }

    async fn query(&self, sql: &str, _params: &[Value]) -> Result<QueryResult> {
        self.server.log.lock().push(sql.to_string());
        if sql != LAG_QUERY {
            return Ok(QueryResult::empty());
        }
        if self.server.lag_fails.load(Ordering::SeqCst) {
            return Err(DesklineError::Query("replication status unavailable".into()));
        }
        let lag = self.server.lag_seconds.load(Ordering::SeqCst);
        Ok(QueryResult {
            rows: vec![Row::new(vec!["lag_seconds".to_string()], vec![Value::UInt64(lag)])],
            ..QueryResult::empty()
        })
    }

    async fn ping(&self) -> Result<()> {
        if self.server.ping_fails.load(Ordering::SeqCst) {
            return Err(DesklineError::Connection("server has gone away".into()));
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

struct MockDriver {
    server: Arc<MockServer>,
}

#[async_trait]
impl DatabaseDriver for MockDriver {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn connect(&self, _config: &ConnectionConfig) -> Result<Arc<dyn Connection>> {
        if self.server.refuse.load(Ordering::SeqCst) {
            return Err(DesklineError::Connection("connection refused".into()));
        }
        self.server.opened.fetch_add(1, Ordering::SeqCst);
        let session = Arc::new(MockConnection {
            server: self.server.clone(),
            closed: AtomicBool::new(false),
        });
        self.server.sessions.lock().push(session.clone());
        Ok(session)
    }

    fn build_connection_string(&self, _config: &ConnectionConfig) -> String {
        "mock://".to_string()
    }
}

fn endpoint(label: &str) -> (Arc<MockServer>, Endpoint) {
    let server = Arc::new(MockServer::default());
    let driver = Arc::new(MockDriver {
        server: server.clone(),
    });
    let endpoint = Endpoint::new(label, driver, ConnectionConfig::new("mock", label));
    (server, endpoint)
}

fn registry() -> Arc<StatementRegistry> {
    let registry = StatementRegistry::new();
    registry.register_statement(
        "ticket.by_id",
        1000,
        "SELECT id, title FROM tickets WHERE id = ?",
        RoleAffinity::Both,
    );
    Arc::new(registry)
}

fn limits(sync_min: usize, async_min: usize) -> PoolConfig {
    PoolConfig::new(RoleLimits::new(sync_min, 10, 8), RoleLimits::new(async_min, 10, 0))
}

async fn primary_pool(config: PoolConfig) -> (Arc<MockServer>, ConnectionPool) {
    let (server, primary) = endpoint("ticketing/primary");
    let pool = ConnectionPool::new("ticketing", registry());
    pool.configure(config, PoolTargets::new(primary)).await.unwrap();
    (server, pool)
}

async fn replicated_pool(policy: ReplicaPolicy) -> (Arc<MockServer>, Arc<MockServer>, ConnectionPool) {
    let (primary_server, primary) = endpoint("ticketing/primary");
    let (replica_server, replica) = endpoint("ticketing/replica");
    let pool = ConnectionPool::new("ticketing", registry());
    pool.configure(
        limits(1, 1).with_replica(policy),
        PoolTargets::new(primary).with_replica(replica),
    )
    .await
    .unwrap();
    (primary_server, replica_server, pool)
}

fn replicas_enabled(read_fallback: bool) -> ReplicaPolicy {
    ReplicaPolicy {
        enabled: true,
        read_fallback,
        ..ReplicaPolicy::default()
    }
}

const LAG_QUERY: &str = "SELECT lag_seconds FROM replica_status";

const SYNC_PRIMARY: CollectionKey = CollectionKey::new(ConnectionRole::Sync, false);
const SYNC_REPLICA: CollectionKey = CollectionKey::new(ConnectionRole::Sync, true);

// =============================================================================
// PoolConfig tests
// =============================================================================

#[test]
fn test_pool_config_default() {
    let config = PoolConfig::default();
    assert_eq!(config.limits(ConnectionRole::Sync).min_size(), 1);
    assert_eq!(config.limits(ConnectionRole::Async).max_size(), 10);
    assert_eq!(config.ping_interval(), Duration::from_secs(60));
    assert_eq!(config.acquire_timeout(), None);
    assert!(!config.replica().enabled);
    assert!(config.validate().is_ok());
}

#[test]
#[should_panic(expected = "min_size (10) cannot exceed max_size (5)")]
fn test_role_limits_min_exceeds_max() {
    RoleLimits::new(10, 5, 0);
}

#[test]
fn test_pool_config_from_toml() {
    let config: PoolConfig = toml::from_str(indoc! {r#"
        ping_interval_seconds = 30
        acquire_timeout_ms = 2500

        [sync]
        min_size = 2
        max_size = 10
        max_queue_depth = 8

        [async]
        min_size = 1
        max_size = 4

        [replica]
        enabled = true
        read_fallback = false
        max_lag_seconds = 5
    "#})
    .unwrap();

    assert_eq!(*config.limits(ConnectionRole::Sync), RoleLimits::new(2, 10, 8));
    assert_eq!(*config.limits(ConnectionRole::Async), RoleLimits::new(1, 4, 0));
    assert_eq!(config.ping_interval(), Duration::from_secs(30));
    assert_eq!(config.acquire_timeout(), Some(Duration::from_millis(2500)));
    assert!(config.replica().enabled);
    assert!(!config.replica().read_fallback);
    assert_eq!(config.replica().max_lag_seconds, 5);
}

#[test]
fn test_pool_config_validation_rejects_file_values() {
    let inverted: PoolConfig = toml::from_str(indoc! {r#"
        [sync]
        min_size = 5
        max_size = 2
    "#})
    .unwrap();
    assert!(matches!(inverted.validate(), Err(DesklineError::Configuration(_))));

    let no_interval = PoolConfig::default().with_ping_interval_seconds(0);
    assert!(matches!(no_interval.validate(), Err(DesklineError::Configuration(_))));

    let shrinking_backoff = PoolConfig::default().with_reconnect_delay_seconds(60, 10);
    assert!(matches!(shrinking_backoff.validate(), Err(DesklineError::Configuration(_))));
}

// =============================================================================
// Configure tests
// =============================================================================

#[tokio::test]
async fn test_configure_creates_min_size_connections_without_replica() {
    let (server, primary) = endpoint("ticketing/primary");
    let pool = ConnectionPool::new("ticketing", registry());

    let report = pool
        .configure(limits(2, 1), PoolTargets::new(primary))
        .await
        .unwrap();

    assert_eq!(report.sync_primary, 2);
    assert_eq!(report.sync_replica, 0);
    assert_eq!(report.async_primary, 1);
    assert_eq!(report.async_replica, 0);
    assert_eq!(server.opened(), 3);

    let stats = pool.stats();
    assert_eq!(stats.collection(SYNC_PRIMARY).idle, 2);
    assert_eq!(stats.collection(SYNC_REPLICA).total, 0);
    assert_eq!(stats.generation, 1);
}

#[tokio::test]
async fn test_configure_rejects_invalid_config() {
    let (_server, primary) = endpoint("ticketing/primary");
    let pool = ConnectionPool::new("ticketing", registry());

    let err = pool
        .configure(limits(1, 1).with_ping_interval_seconds(0), PoolTargets::new(primary))
        .await
        .unwrap_err();
    assert!(matches!(err, DesklineError::Configuration(_)));
    assert_eq!(pool.stats().generation, 0);
}

#[tokio::test]
async fn test_inactive_primary_leaves_pool_empty() {
    let (server, primary) = endpoint("ticketing/primary");
    let pool = ConnectionPool::new("ticketing", registry());

    let report = pool
        .configure(limits(2, 2), PoolTargets::new(primary.inactive()))
        .await
        .unwrap();

    assert_eq!(report, PerCollection::default());
    assert_eq!(server.opened(), 0);
    let err = pool.acquire(ConnectionRole::Sync, false).await.unwrap_err();
    assert!(matches!(err, DesklineError::NoConnections(_)));
}

#[tokio::test]
async fn test_creation_failures_are_skipped() {
    let (server, primary) = endpoint("ticketing/primary");
    server.refuse.store(true, Ordering::SeqCst);
    let pool = ConnectionPool::new("ticketing", registry());

    let report = pool
        .configure(limits(2, 1), PoolTargets::new(primary))
        .await
        .unwrap();

    assert_eq!(report.sync_primary, 0);
    assert_eq!(pool.stats().total(), 0);
}

#[tokio::test]
async fn test_reconfigure_discards_connections_checked_out_before() {
    let (server, primary) = endpoint("ticketing/primary");
    let pool = ConnectionPool::new("ticketing", registry());
    pool.configure(limits(1, 0), PoolTargets::new(primary.clone()))
        .await
        .unwrap();

    let held = pool.acquire(ConnectionRole::Sync, false).await.unwrap();
    let old_id = held.id();

    pool.configure(limits(2, 0), PoolTargets::new(primary))
        .await
        .unwrap();
    drop(held);
    tokio::task::yield_now().await;

    let stats = pool.stats();
    assert_eq!(stats.generation, 2);
    assert_eq!(stats.collection(SYNC_PRIMARY).total, 2);
    assert_eq!(stats.collection(SYNC_PRIMARY).idle, 2);
    assert_eq!(server.opened(), 3);

    let first = pool.acquire(ConnectionRole::Sync, false).await.unwrap();
    let second = pool.acquire(ConnectionRole::Sync, false).await.unwrap();
    assert_ne!(first.id(), old_id);
    assert_ne!(second.id(), old_id);
}

// =============================================================================
// Acquire / release tests
// =============================================================================

#[tokio::test]
async fn test_third_acquire_waits_until_release() {
    let (_server, pool) = primary_pool(limits(2, 1)).await;

    let first = pool.acquire(ConnectionRole::Sync, false).await.unwrap();
    let _second = pool.acquire(ConnectionRole::Sync, false).await.unwrap();
    assert!(pool.stats().collection(SYNC_PRIMARY).is_exhausted());

    let third = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.acquire(ConnectionRole::Sync, false).await.map(|c| c.id()) })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!third.is_finished(), "third acquire should wait for a release");
    assert_eq!(pool.stats().waiting, 1);

    let released_id = first.id();
    drop(first);

    let acquired_id = tokio::time::timeout(Duration::from_secs(5), third)
        .await
        .expect("waiter woken by release")
        .unwrap()
        .unwrap();
    assert_eq!(acquired_id, released_id);
    assert_eq!(pool.stats().waiting, 0);
}

#[tokio::test]
async fn test_release_then_reacquire_keeps_statement_cache() {
    let (server, pool) = primary_pool(limits(1, 0)).await;

    let mut conn = pool.acquire(ConnectionRole::Sync, false).await.unwrap();
    let handle = conn.prepare("ticket.by_id").await.unwrap();
    conn.bind(handle, 0, 7i64).unwrap();
    conn.execute_select(handle).await.unwrap();
    let id = conn.id();
    drop(conn);

    let conn = pool.acquire(ConnectionRole::Sync, false).await.unwrap();
    assert_eq!(conn.id(), id);
    assert_eq!(conn.cached_statements(), 1);
    assert!(server.executed("SELECT id, title FROM tickets WHERE id = ?"));
}

#[tokio::test]
async fn test_role_without_connections_fails_fast() {
    let (_server, pool) = primary_pool(limits(1, 0)).await;

    let err = pool.acquire(ConnectionRole::Async, false).await.unwrap_err();
    assert!(matches!(err, DesklineError::NoConnections(_)));
}

#[tokio::test(start_paused = true)]
async fn test_acquire_with_deadline_times_out() {
    let (_server, pool) = primary_pool(limits(1, 0)).await;
    let _held = pool.acquire(ConnectionRole::Sync, false).await.unwrap();

    let err = pool
        .acquire_with(
            ConnectionRole::Sync,
            false,
            AcquireOptions::timeout(Duration::from_millis(200)),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, DesklineError::Timeout(_)));
    assert_eq!(pool.stats().waiting, 0);
}

#[tokio::test(start_paused = true)]
async fn test_configured_acquire_timeout_applies_by_default() {
    let (_server, pool) = primary_pool(limits(1, 0).with_acquire_timeout_ms(100)).await;
    let _held = pool.acquire(ConnectionRole::Sync, false).await.unwrap();

    let err = pool.acquire(ConnectionRole::Sync, false).await.unwrap_err();
    assert!(matches!(err, DesklineError::Timeout(_)));
}

#[tokio::test]
async fn test_acquire_cancelled_by_token() {
    let (_server, pool) = primary_pool(limits(1, 0)).await;
    let _held = pool.acquire(ConnectionRole::Sync, false).await.unwrap();

    let token = CancellationToken::new();
    let waiter = {
        let pool = pool.clone();
        let options = AcquireOptions::default().with_cancel(token.clone());
        tokio::spawn(async move { pool.acquire_with(ConnectionRole::Sync, false, options).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    token.cancel();

    let err = tokio::time::timeout(Duration::from_secs(5), waiter)
        .await
        .expect("cancel wakes waiter")
        .unwrap()
        .unwrap_err();
    assert!(matches!(err, DesklineError::Cancelled));
}

#[tokio::test]
async fn test_disconnected_connection_is_parked_as_broken() {
    let (server, pool) = primary_pool(limits(1, 0)).await;

    let conn = pool.acquire(ConnectionRole::Sync, false).await.unwrap();
    server.kill_sessions();
    drop(conn);

    let stats = pool.stats().collection(SYNC_PRIMARY).clone();
    assert_eq!(stats.broken, 1);
    assert_eq!(stats.idle, 0);
    assert_eq!(stats.total, 1);
}

#[tokio::test]
async fn test_open_transaction_rolled_back_on_release() {
    let (server, pool) = primary_pool(limits(1, 0)).await;

    let mut conn = pool.acquire(ConnectionRole::Sync, false).await.unwrap();
    conn.begin_transaction().await.unwrap();
    drop(conn);

    let conn = tokio::time::timeout(Duration::from_secs(5), pool.acquire(ConnectionRole::Sync, false))
        .await
        .expect("connection re-queued after rollback")
        .unwrap();
    assert!(!conn.in_transaction());
    assert!(server.executed("BEGIN"));
    assert!(server.executed("ROLLBACK"));
}

// =============================================================================
// Replica selection tests
// =============================================================================

#[tokio::test]
async fn test_prefer_replica_hands_out_replica() {
    let (_primary, _replica, pool) = replicated_pool(replicas_enabled(true)).await;

    let conn = pool.acquire(ConnectionRole::Sync, true).await.unwrap();
    assert!(conn.is_replica());

    let conn = pool.acquire(ConnectionRole::Sync, false).await.unwrap();
    assert!(!conn.is_replica());
}

#[tokio::test]
async fn test_read_fallback_uses_replica_when_primary_busy() {
    let (_primary, _replica, pool) = replicated_pool(replicas_enabled(true)).await;

    let held = pool.acquire(ConnectionRole::Sync, false).await.unwrap();
    assert!(!held.is_replica());

    let fallback = pool.acquire(ConnectionRole::Sync, false).await.unwrap();
    assert!(fallback.is_replica());
}

#[tokio::test(start_paused = true)]
async fn test_without_read_fallback_waits_for_primary() {
    let (_primary, _replica, pool) = replicated_pool(replicas_enabled(false)).await;
    let _held = pool.acquire(ConnectionRole::Sync, false).await.unwrap();

    let err = pool
        .acquire_with(
            ConnectionRole::Sync,
            false,
            AcquireOptions::timeout(Duration::from_millis(100)),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, DesklineError::Timeout(_)));
    assert_eq!(pool.stats().collection(SYNC_REPLICA).idle, 1);
}

#[tokio::test]
async fn test_disabled_replica_gets_no_connections() {
    let (_primary, replica_server, pool) = replicated_pool(ReplicaPolicy::default()).await;

    assert_eq!(replica_server.opened(), 0);
    assert_eq!(pool.stats().collection(SYNC_REPLICA).total, 0);

    let conn = pool.acquire(ConnectionRole::Sync, true).await.unwrap();
    assert!(!conn.is_replica());
}

// =============================================================================
// Maintenance tests
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_maintenance_recovers_broken_connection() {
    let (server, pool) = primary_pool(limits(1, 0).with_ping_interval_seconds(1)).await;

    let conn = pool.acquire(ConnectionRole::Sync, false).await.unwrap();
    server.kill_sessions();
    drop(conn);
    assert_eq!(pool.stats().broken(), 1);

    tokio::time::sleep(Duration::from_millis(1500)).await;

    let stats = pool.stats();
    assert_eq!(stats.broken(), 0);
    assert_eq!(stats.idle(), 1);
    assert_eq!(server.opened(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_maintenance_reconnects_after_failed_ping() {
    let (server, pool) = primary_pool(
        limits(1, 0)
            .with_ping_interval_seconds(1)
            .with_reconnect_delay_seconds(2, 10),
    )
    .await;

    server.ping_fails.store(true, Ordering::SeqCst);
    // First tick at 1s fails the ping, backoff sleeps 2s, then reconnects
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(pool.stats().collection(SYNC_PRIMARY).maintaining, 1);
    server.ping_fails.store(false, Ordering::SeqCst);

    tokio::time::sleep(Duration::from_secs(2)).await;

    assert_eq!(server.opened(), 2);
    assert!(server.sessions.lock()[0].is_closed());
    let stats = pool.stats();
    assert_eq!(stats.idle(), 1);
    assert_eq!(stats.collection(SYNC_PRIMARY).maintaining, 0);
}

#[tokio::test(start_paused = true)]
async fn test_maintenance_backs_off_while_server_refuses() {
    let (server, pool) = primary_pool(
        limits(1, 0)
            .with_ping_interval_seconds(1)
            .with_reconnect_delay_seconds(4, 60),
    )
    .await;

    let conn = pool.acquire(ConnectionRole::Sync, false).await.unwrap();
    server.kill_sessions();
    server.refuse.store(true, Ordering::SeqCst);
    drop(conn);

    // Reconnect fails at 1s; the next attempt is not due before 5s
    tokio::time::sleep(Duration::from_millis(3500)).await;
    assert_eq!(pool.stats().broken(), 1);

    server.refuse.store(false, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(1000)).await;
    assert_eq!(pool.stats().broken(), 1);

    tokio::time::sleep(Duration::from_millis(1000)).await;
    assert_eq!(pool.stats().broken(), 0);
    assert_eq!(pool.stats().idle(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_maintenance_pings_idle_while_another_stays_broken() {
    let (server, pool) = primary_pool(
        limits(2, 0)
            .with_ping_interval_seconds(1)
            .with_reconnect_delay_seconds(1, 10),
    )
    .await;

    // First session goes down and cannot come back
    let conn = pool.acquire(ConnectionRole::Sync, false).await.unwrap();
    server.sessions.lock()[0].closed.store(true, Ordering::SeqCst);
    server.refuse.store(true, Ordering::SeqCst);
    drop(conn);
    assert_eq!(pool.stats().broken(), 1);
    assert_eq!(pool.stats().idle(), 1);

    // Second session is still open but no longer answers
    server.ping_fails.store(true, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(5500)).await;

    let stats = pool.stats();
    assert_eq!(stats.idle(), 0);
    assert_eq!(stats.broken(), 2);
    assert!(server.sessions.lock()[1].is_closed());
}

#[tokio::test(start_paused = true)]
async fn test_replica_lag_checked_only_on_replicas_and_never_breaks_them() {
    let policy = ReplicaPolicy {
        lag_query: Some(LAG_QUERY.to_string()),
        max_lag_seconds: 5,
        ..replicas_enabled(true)
    };
    let (primary_server, replica_server, pool) = replicated_pool(policy).await;
    let idle_before = pool.stats().idle();
    assert_eq!(idle_before, 4);

    // Lagging well past the limit: warned about, still handed out
    replica_server.lag_seconds.store(120, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(60_500)).await;
    let checks = replica_server.times_executed(LAG_QUERY);
    assert_eq!(checks, 2);
    assert_eq!(pool.stats().idle(), idle_before);

    // Failing lag query is only logged
    replica_server.lag_fails.store(true, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(replica_server.times_executed(LAG_QUERY), checks + 2);
    assert_eq!(pool.stats().idle(), idle_before);
    assert_eq!(pool.stats().broken(), 0);
    assert_eq!(replica_server.opened(), 2);

    assert!(!primary_server.executed(LAG_QUERY));
    let conn = pool.acquire(ConnectionRole::Sync, true).await.unwrap();
    assert!(conn.is_replica());
}

// =============================================================================
// Async submission tests
// =============================================================================

#[tokio::test]
async fn test_submit_async_runs_with_async_connection() {
    let (server, pool) = primary_pool(limits(1, 1)).await;
    let (tx, rx) = tokio::sync::oneshot::channel();

    pool.submit_async(ConnectionRole::Async, false, move |mut conn| async move {
        let handle = conn.prepare(1000u32).await?;
        conn.bind(handle, 0, 42i64)?;
        conn.execute_select(handle).await?;
        let _ = tx.send(conn.role());
        Ok(())
    })
    .await;

    let role = tokio::time::timeout(Duration::from_secs(5), rx)
        .await
        .expect("job ran")
        .unwrap();
    assert_eq!(role, ConnectionRole::Async);
    assert!(server.executed("SELECT id, title FROM tickets WHERE id = ?"));
}

#[tokio::test]
async fn test_cancelled_submission_never_acquires() {
    let (_server, pool) = primary_pool(limits(1, 1)).await;
    let held = pool.acquire(ConnectionRole::Async, false).await.unwrap();
    let ran = Arc::new(AtomicBool::new(false));

    // Occupies the worker until `held` is released
    pool.submit_async(ConnectionRole::Async, false, |_conn| async { Ok(()) })
        .await;

    let flag = ran.clone();
    let token = pool
        .submit_async(ConnectionRole::Async, false, move |_conn| async move {
            flag.store(true, Ordering::SeqCst);
            Ok(())
        })
        .await;
    token.cancel();

    drop(held);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!ran.load(Ordering::SeqCst));
    assert_eq!(pool.stats().queued_jobs, 0);
}

// =============================================================================
// Shutdown tests
// =============================================================================

#[tokio::test]
async fn test_shutdown_twice_and_acquire_after() {
    let (server, pool) = primary_pool(limits(2, 1)).await;

    pool.shutdown().await;
    pool.shutdown().await;

    assert!(pool.is_closed());
    assert_eq!(pool.stats().total(), 0);
    assert!(server.sessions.lock().iter().all(|s| s.is_closed()));

    let err = pool.acquire(ConnectionRole::Sync, false).await.unwrap_err();
    assert!(matches!(err, DesklineError::PoolClosed));
}

#[tokio::test]
async fn test_shutdown_wakes_waiters_with_pool_closed() {
    let (_server, pool) = primary_pool(limits(1, 0)).await;
    let held = pool.acquire(ConnectionRole::Sync, false).await.unwrap();

    let waiter = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.acquire(ConnectionRole::Sync, false).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    pool.shutdown().await;
    let err = tokio::time::timeout(Duration::from_secs(5), waiter)
        .await
        .expect("shutdown wakes waiter")
        .unwrap()
        .unwrap_err();
    assert!(matches!(err, DesklineError::PoolClosed));

    // Returned after shutdown: disconnected instead of re-queued
    drop(held);
    assert_eq!(pool.stats().total(), 0);
}

#[tokio::test]
async fn test_configure_after_shutdown_fails() {
    let (_server, pool) = primary_pool(limits(1, 0)).await;
    pool.shutdown().await;

    let (_other, primary) = endpoint("ticketing/primary");
    let err = pool
        .configure(limits(1, 0), PoolTargets::new(primary))
        .await
        .unwrap_err();
    assert!(matches!(err, DesklineError::PoolClosed));
}
