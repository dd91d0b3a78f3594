//! Background upkeep of pooled connections

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::collection::CollectionKey;
use super::config::PoolConfig;
use super::pool::{PoolInner, dispose};
use crate::connection::DbConnection;
use crate::health::{ReplicaLag, measure_replication_lag, ping_database};
use crate::reconnect::FailureStreak;

/// Upper bound for a single liveness probe
const PING_TIMEOUT: Duration = Duration::from_secs(5);

/// Reconnect backoff of one connection
#[derive(Debug, Default)]
struct Retry {
    streak: FailureStreak,
    next_attempt: Option<Instant>,
}

impl Retry {
    fn failed(&mut self, config: &PoolConfig) -> Duration {
        let delay = self.streak.record_failure(&config.backoff());
        self.next_attempt = Some(Instant::now() + delay);
        delay
    }

    fn is_due(&self) -> bool {
        self.next_attempt.is_none_or(|at| Instant::now() >= at)
    }
}

/// Retry state keyed by connection id
type Streaks = HashMap<u64, Retry>;

enum Outcome {
    Healthy,
    Disconnected,
    Cancelled,
}

pub(super) fn spawn(pool: Weak<PoolInner>, token: CancellationToken, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(run(pool, token, interval))
}

async fn run(pool: Weak<PoolInner>, token: CancellationToken, interval: Duration) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut streaks = Streaks::new();

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let Some(pool) = pool.upgrade() else {
            break;
        };
        if !run_cycle(&pool, &token, &mut streaks).await {
            break;
        }
    }
    tracing::debug!("pool maintenance stopped");
}

/// One pass over every collection. Returns false once cancelled.
async fn run_cycle(pool: &Arc<PoolInner>, token: &CancellationToken, streaks: &mut Streaks) -> bool {
    let (config, generation) = {
        let state = pool.state.lock();
        if state.closed {
            return false;
        }
        (state.config.clone(), state.generation)
    };

    for key in CollectionKey::ALL {
        // Visit every connection known at the start of the pass exactly once
        let pending: Vec<u64> = {
            let state = pool.state.lock();
            let collection = state.collections.get(key);
            collection
                .broken
                .iter()
                .chain(collection.idle.iter())
                .map(DbConnection::id)
                .collect()
        };

        for id in pending {
            let Some(mut conn) = take_for_maintenance(pool, key, generation, id) else {
                continue;
            };

            let outcome = maintain(&mut conn, &config, token, streaks).await;
            put_back(pool, key, conn, generation);

            if matches!(outcome, Outcome::Cancelled) {
                return false;
            }
        }
    }

    // Forget streaks of connections that no longer exist
    let live: Vec<u64> = {
        let state = pool.state.lock();
        CollectionKey::ALL
            .iter()
            .flat_map(|key| {
                let collection = state.collections.get(*key);
                collection.broken.iter().map(DbConnection::id).collect::<Vec<_>>()
            })
            .collect()
    };
    streaks.retain(|id, _| live.contains(id));
    true
}

/// Removes connection `id` from the broken list or the idle queue. `None` if
/// it was checked out (or dropped) since the pass started.
fn take_for_maintenance(pool: &PoolInner, key: CollectionKey, generation: u64, id: u64) -> Option<DbConnection> {
    let mut state = pool.state.lock();
    if state.closed || state.generation != generation {
        return None;
    }
    let collection = state.collections.get_mut(key);
    let conn = match collection.broken.iter().position(|conn| conn.id() == id) {
        Some(index) => collection.broken.swap_remove(index),
        None => {
            let index = collection.idle.iter().position(|conn| conn.id() == id)?;
            collection.idle.remove(index)?
        }
    };
    collection.maintaining += 1;
    Some(conn)
}

fn put_back(pool: &PoolInner, key: CollectionKey, conn: DbConnection, generation: u64) {
    let mut state = pool.state.lock();
    if state.closed || state.generation != generation {
        drop(state);
        dispose(conn);
        return;
    }

    let collection = state.collections.get_mut(key);
    collection.maintaining = collection.maintaining.saturating_sub(1);
    if conn.is_connected() {
        collection.idle.push_back(conn);
        drop(state);
        pool.released.notify_waiters();
    } else {
        collection.broken.push(conn);
    }
}

async fn maintain(
    conn: &mut DbConnection,
    config: &PoolConfig,
    token: &CancellationToken,
    streaks: &mut Streaks,
) -> Outcome {
    if !conn.is_connected() {
        let due = streaks.get(&conn.id()).is_none_or(Retry::is_due);
        if !due {
            return Outcome::Disconnected;
        }
        return reconnect(conn, config, streaks).await;
    }

    let Some(transport) = conn.raw_transport() else {
        return reconnect(conn, config, streaks).await;
    };

    match ping_database(transport.as_ref(), PING_TIMEOUT).await {
        Ok(latency) => {
            tracing::trace!(conn_id = conn.id(), latency_ms = latency.as_millis() as u64, "ping ok");
            streaks.remove(&conn.id());
        }
        Err(e) => {
            tracing::warn!(conn_id = conn.id(), endpoint = %conn.endpoint().label, error = %e, "ping failed, reconnecting");
            conn.disconnect().await;

            let delay = streaks.entry(conn.id()).or_default().failed(config);
            tokio::select! {
                _ = token.cancelled() => return Outcome::Cancelled,
                _ = tokio::time::sleep(delay) => {}
            }
            return reconnect(conn, config, streaks).await;
        }
    }

    if conn.is_replica() {
        check_lag(conn, config).await;
    }
    Outcome::Healthy
}

async fn reconnect(conn: &mut DbConnection, config: &PoolConfig, streaks: &mut Streaks) -> Outcome {
    match conn.connect().await {
        Ok(()) => {
            if streaks.remove(&conn.id()).is_some() {
                tracing::info!(conn_id = conn.id(), endpoint = %conn.endpoint().label, "connection recovered");
            }
            Outcome::Healthy
        }
        Err(e) => {
            let retry = streaks.entry(conn.id()).or_default();
            let delay = retry.failed(config);
            tracing::warn!(
                conn_id = conn.id(),
                endpoint = %conn.endpoint().label,
                failures = retry.streak.count(),
                retry_in_ms = delay.as_millis() as u64,
                error = %e,
                "reconnect failed"
            );
            Outcome::Disconnected
        }
    }
}

async fn check_lag(conn: &DbConnection, config: &PoolConfig) {
    let policy = config.replica();
    let query = match policy.lag_query.as_deref() {
        Some(query) => query,
        None => match conn.endpoint().driver.replication_lag_query() {
            Some(query) => query,
            None => return,
        },
    };
    let Some(transport) = conn.raw_transport() else {
        return;
    };

    match measure_replication_lag(transport.as_ref(), query).await {
        Ok(lag) if lag.exceeds(policy.max_lag_seconds) => {
            if let ReplicaLag::Seconds(seconds) = lag {
                tracing::warn!(
                    conn_id = conn.id(),
                    endpoint = %conn.endpoint().label,
                    lag_seconds = seconds,
                    max_lag_seconds = policy.max_lag_seconds,
                    "replica is lagging"
                );
            }
        }
        Ok(lag) => {
            tracing::trace!(conn_id = conn.id(), ?lag, "replica lag within bounds");
        }
        Err(e) => {
            tracing::warn!(conn_id = conn.id(), error = %e, "replica lag check failed");
        }
    }
}
