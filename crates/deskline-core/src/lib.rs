//! Deskline Core - shared abstractions for the database connectivity layer
//!
//! This crate provides the traits and types every other Deskline crate
//! depends on:
//!
//! - `DatabaseDriver` - Trait for database driver implementations
//! - `Connection` - Trait for a single driver session
//! - `StatementRegistry` - Catalog of parameterized statements
//! - `ResultSet` - Forward-only cursor with typed field access
//! - Common types like `Value`, `Row`, `ConnectionRole`, etc.

mod connection;
mod driver;
mod error;
mod result_set;
mod role;
pub mod security;
mod statement;
mod types;

pub use connection::*;
pub use driver::*;
pub use error::*;
pub use result_set::*;
pub use role::*;
pub use security::*;
pub use statement::*;
pub use types::*;
