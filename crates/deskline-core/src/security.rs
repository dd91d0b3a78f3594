//! Security-related configuration types for database connections

mod ssh_config;

pub use ssh_config::*;
