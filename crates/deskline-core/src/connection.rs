//! Driver-level connection trait

use crate::{QueryResult, Result, StatementResult, Value};
use async_trait::async_trait;

/// A single driver session to a database.
///
/// This is the transport the pool wraps: it knows how to run SQL with
/// positional parameters but carries no role, statement cache or tunnel.
/// Implementations are expected to serialise access internally; the pool
/// additionally guarantees that only one holder uses a session at a time.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Get the driver name (e.g., "sqlite", "mysql")
    fn driver_name(&self) -> &str;

    /// Execute a statement that modifies data (INSERT/UPDATE/DELETE)
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<StatementResult>;

    /// Execute a query that returns rows (SELECT)
    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult>;

    /// Ask the server to compile `sql` without running it.
    ///
    /// Drivers that cannot validate ahead of time accept everything and
    /// report problems at execution time instead.
    async fn prepare(&self, _sql: &str) -> Result<()> {
        Ok(())
    }

    /// Begin a transaction on this session
    async fn begin_transaction(&self) -> Result<()> {
        self.execute("BEGIN", &[]).await.map(|_| ())
    }

    /// Commit the open transaction
    async fn commit(&self) -> Result<()> {
        self.execute("COMMIT", &[]).await.map(|_| ())
    }

    /// Roll back the open transaction
    async fn rollback(&self) -> Result<()> {
        self.execute("ROLLBACK", &[]).await.map(|_| ())
    }

    /// Lightweight liveness probe
    async fn ping(&self) -> Result<()> {
        self.query("SELECT 1", &[]).await.map(|_| ())
    }

    /// Close the connection
    async fn close(&self) -> Result<()>;

    /// Check if the connection is closed
    fn is_closed(&self) -> bool;
}
