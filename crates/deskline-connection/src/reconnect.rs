//! Reconnect timing for the pool maintenance loop
//!
//! A connection that fails its liveness probe is disconnected and retried
//! after a delay that doubles with every consecutive failure, starting at
//! `reconnect_delay_seconds` and capped at `max_reconnect_delay_seconds`.

mod backoff;


pub use backoff::{BackoffStrategy, FailureStreak};
