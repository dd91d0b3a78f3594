//! Pool configuration types

use std::time::Duration;

use deskline_core::{ConnectionRole, DesklineError, Result};
use serde::{Deserialize, Serialize};

use crate::reconnect::BackoffStrategy;

/// Sizing and backpressure for one connection role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleLimits {
    /// Connections created per collection when the pool is configured
    min_size: usize,
    /// Upper bound accepted for validation and reporting; the pool never
    /// grows past `min_size`
    max_size: usize,
    /// Pending async jobs allowed before `submit_async` waits; 0 is unbounded
    #[serde(default)]
    max_queue_depth: usize,
}

impl RoleLimits {
    /// Create limits for a role
    ///
    /// # Panics
    ///
    /// Panics if `min_size > max_size` or if `max_size` is 0.
    pub fn new(min_size: usize, max_size: usize, max_queue_depth: usize) -> Self {
        assert!(
            max_size > 0,
            "max_size must be greater than 0, got {}",
            max_size
        );
        assert!(
            min_size <= max_size,
            "min_size ({}) cannot exceed max_size ({})",
            min_size,
            max_size
        );

        Self {
            min_size,
            max_size,
            max_queue_depth,
        }
    }

    pub fn min_size(&self) -> usize {
        self.min_size
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn max_queue_depth(&self) -> usize {
        self.max_queue_depth
    }

    /// Same checks as [`RoleLimits::new`], for values read from a file
    fn validate(&self, role: ConnectionRole) -> Result<()> {
        if self.max_size == 0 {
            return Err(DesklineError::Configuration(format!(
                "{} max_size must be greater than 0",
                role
            )));
        }
        if self.min_size > self.max_size {
            return Err(DesklineError::Configuration(format!(
                "{} min_size ({}) cannot exceed max_size ({})",
                role, self.min_size, self.max_size
            )));
        }
        Ok(())
    }
}

impl Default for RoleLimits {
    fn default() -> Self {
        Self::new(1, 10, 0)
    }
}

/// When and how replicas serve reads
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicaPolicy {
    /// Create replica connections at all
    pub enabled: bool,
    /// Hand out a replica when no primary connection of the role is idle
    pub read_fallback: bool,
    /// Overrides the driver's lag query
    pub lag_query: Option<String>,
    /// Lag above this is logged as a warning
    pub max_lag_seconds: u64,
}

impl Default for ReplicaPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            read_fallback: true,
            lag_query: None,
            max_lag_seconds: 30,
        }
    }
}

/// Configuration for a connection pool
///
/// Controls per-role sizing, maintenance timing and replica usage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    sync: RoleLimits,
    #[serde(rename = "async")]
    async_limits: RoleLimits,
    /// Seconds between maintenance passes
    ping_interval_seconds: u64,
    /// First reconnect delay; doubles per consecutive failure
    reconnect_delay_seconds: u64,
    /// Cap for the reconnect delay
    max_reconnect_delay_seconds: u64,
    replica: ReplicaPolicy,
    /// Default bound for `acquire`; `None` waits until a release or shutdown
    acquire_timeout_ms: Option<u64>,
}

impl PoolConfig {
    /// Create a configuration with the given sync and async limits
    pub fn new(sync: RoleLimits, async_limits: RoleLimits) -> Self {
        Self {
            sync,
            async_limits,
            ..Self::default()
        }
    }

    pub fn with_limits(mut self, role: ConnectionRole, limits: RoleLimits) -> Self {
        match role {
            ConnectionRole::Sync => self.sync = limits,
            ConnectionRole::Async => self.async_limits = limits,
        }
        self
    }

    pub fn with_replica(mut self, replica: ReplicaPolicy) -> Self {
        self.replica = replica;
        self
    }

    pub fn with_ping_interval_seconds(mut self, seconds: u64) -> Self {
        self.ping_interval_seconds = seconds;
        self
    }

    pub fn with_reconnect_delay_seconds(mut self, initial: u64, max: u64) -> Self {
        self.reconnect_delay_seconds = initial;
        self.max_reconnect_delay_seconds = max;
        self
    }

    pub fn with_acquire_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.acquire_timeout_ms = Some(timeout_ms);
        self
    }

    pub fn limits(&self, role: ConnectionRole) -> &RoleLimits {
        match role {
            ConnectionRole::Sync => &self.sync,
            ConnectionRole::Async => &self.async_limits,
        }
    }

    pub fn replica(&self) -> &ReplicaPolicy {
        &self.replica
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_seconds)
    }

    pub fn acquire_timeout(&self) -> Option<Duration> {
        self.acquire_timeout_ms.map(Duration::from_millis)
    }

    /// Backoff used between reconnect attempts of one connection
    pub fn backoff(&self) -> BackoffStrategy {
        BackoffStrategy::from_seconds(self.reconnect_delay_seconds, self.max_reconnect_delay_seconds)
    }

    /// Reject limits and timings the pool cannot honour
    pub fn validate(&self) -> Result<()> {
        for role in ConnectionRole::ALL {
            self.limits(role).validate(role)?;
        }
        if self.ping_interval_seconds == 0 {
            return Err(DesklineError::Configuration(
                "ping_interval_seconds must be greater than 0".into(),
            ));
        }
        if self.max_reconnect_delay_seconds < self.reconnect_delay_seconds {
            return Err(DesklineError::Configuration(format!(
                "max_reconnect_delay_seconds ({}) is below reconnect_delay_seconds ({})",
                self.max_reconnect_delay_seconds, self.reconnect_delay_seconds
            )));
        }
        if self.replica.lag_query.as_deref().is_some_and(|q| q.trim().is_empty()) {
            return Err(DesklineError::Configuration("replica.lag_query is empty".into()));
        }
        Ok(())
    }
}

impl Default for PoolConfig {
    /// Defaults:
    /// - sync and async: min 1, max 10, unbounded queue
    /// - ping every 60 seconds
    /// - reconnect after 5 seconds, backing off to 5 minutes
    /// - replicas disabled
    /// - acquire waits indefinitely
    fn default() -> Self {
        Self {
            sync: RoleLimits::default(),
            async_limits: RoleLimits::default(),
            ping_interval_seconds: 60,
            reconnect_delay_seconds: 5,
            max_reconnect_delay_seconds: 300,
            replica: ReplicaPolicy::default(),
            acquire_timeout_ms: None,
        }
    }
}
