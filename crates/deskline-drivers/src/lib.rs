//! Deskline Drivers - Database driver implementations
//!
//! This crate bundles the concrete drivers behind feature flags and exposes
//! a [`DriverRegistry`] to resolve a driver by the id used in settings files.

#[cfg(feature = "mysql")]
pub use deskline_driver_mysql as mysql;
#[cfg(feature = "sqlite")]
pub use deskline_driver_sqlite as sqlite;

mod registry;

pub use registry::DriverRegistry;

/// Re-export commonly used types from deskline-core
pub use deskline_core::{
    ColumnMeta, Connection, ConnectionConfig, DatabaseDriver, DesklineError, QueryResult, Result,
    Row, StatementResult, Value,
};
