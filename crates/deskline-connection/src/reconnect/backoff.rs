//! Exponential backoff calculator

use std::time::Duration;

/// Exponential backoff strategy for reconnect attempts.
///
/// # Example
///
/// ```
/// use deskline_connection::reconnect::BackoffStrategy;
/// use std::time::Duration;
///
/// let backoff = BackoffStrategy::new(1_000, 60_000);
/// assert_eq!(backoff.calculate_delay(0), Duration::from_secs(1));
/// assert_eq!(backoff.calculate_delay(3), Duration::from_secs(8));
/// assert_eq!(backoff.calculate_delay(30), Duration::from_secs(60));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffStrategy {
    initial_ms: u64,
    max_ms: u64,
    multiplier: f64,
    /// Spread delays by up to 25% either way
    jitter: bool,
}

impl BackoffStrategy {
    /// Create a strategy; the initial delay is at least 1ms and the cap is
    /// never below the initial delay.
    pub fn new(initial_ms: u64, max_ms: u64) -> Self {
        let initial_ms = initial_ms.max(1);
        Self {
            initial_ms,
            max_ms: max_ms.max(initial_ms),
            multiplier: 2.0,
            jitter: false,
        }
    }

    /// Build from the pool's reconnect settings, in seconds
    pub fn from_seconds(initial_seconds: u64, max_seconds: u64) -> Self {
        Self::new(
            initial_seconds.saturating_mul(1_000),
            max_seconds.saturating_mul(1_000),
        )
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier.max(1.0);
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay before retry number `attempt` (zero-based).
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(i32::MAX as u32) as i32;
        let delay_ms = (self.initial_ms as f64) * self.multiplier.powi(exponent);
        let capped_ms = delay_ms.min(self.max_ms as f64) as u64;

        let final_ms = if self.jitter {
            let spread = capped_ms / 4;
            let offset = (jitter_fraction() * (spread * 2) as f64) as u64;
            capped_ms.saturating_sub(spread).saturating_add(offset)
        } else {
            capped_ms
        };

        Duration::from_millis(final_ms)
    }

    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_ms)
    }
}

impl Default for BackoffStrategy {
    /// 5 seconds initial, 5 minutes max
    fn default() -> Self {
        Self::from_seconds(5, 300)
    }
}

/// Consecutive failures of one connection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FailureStreak(u32);

impl FailureStreak {
    /// Record a failure and return the delay to wait before the next attempt
    pub fn record_failure(&mut self, strategy: &BackoffStrategy) -> Duration {
        let delay = strategy.calculate_delay(self.0);
        self.0 = self.0.saturating_add(1);
        delay
    }

    pub fn reset(&mut self) {
        self.0 = 0;
    }

    pub fn count(&self) -> u32 {
        self.0
    }
}

/// Value in `[0, 1)` derived from the clock; good enough to de-synchronise
/// reconnect storms.
fn jitter_fraction() -> f64 {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    (nanos % 1000) as f64 / 1000.0
}
