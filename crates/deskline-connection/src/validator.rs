//! Dry-run validation of registered statements against a live server

use deskline_core::{ConnectionRole, LogicalDatabase, Result, StatementId};
use serde::Serialize;

use crate::manager::DatabaseManager;

/// Result of preparing one statement
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatementOutcome {
    pub id: StatementId,
    pub alias: Option<String>,
    /// Driver error message when the server rejected the statement
    pub error: Option<String>,
}

impl StatementOutcome {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub database: LogicalDatabase,
    pub role: ConnectionRole,
    pub outcomes: Vec<StatementOutcome>,
}

impl ValidationReport {
    pub fn passed(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_ok()).count()
    }

    pub fn failed(&self) -> impl Iterator<Item = &StatementOutcome> {
        self.outcomes.iter().filter(|o| !o.is_ok())
    }

    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(StatementOutcome::is_ok)
    }
}

/// Prepare every statement of the manager's database that `role` may run.
///
/// Statements are checked on a single connection in id order, always on the
/// server even when the session has them cached. A rejected
/// statement is recorded and validation continues; losing the connection
/// aborts with the connection error.
#[tracing::instrument(skip(manager), fields(database = %manager.database()))]
pub async fn validate_statements(manager: &DatabaseManager, role: ConnectionRole) -> Result<ValidationReport> {
    let database = manager.database();
    let statements: Vec<_> = manager
        .registry()
        .get_all()
        .into_iter()
        .filter(|metadata| database.owns(metadata.id) && metadata.affinity.allows(role))
        .collect();

    let mut conn = manager.acquire(role, false).await?;
    let mut outcomes = Vec::with_capacity(statements.len());

    for metadata in statements {
        let error = match conn.check_statement(&metadata).await {
            Ok(_) => None,
            Err(e) if e.is_connection_error() => return Err(e),
            Err(e) => {
                tracing::warn!(id = %metadata.id, alias = ?metadata.alias, error = %e, "statement rejected");
                Some(e.to_string())
            }
        };
        outcomes.push(StatementOutcome {
            id: metadata.id,
            alias: metadata.alias.clone(),
            error,
        });
    }

    let report = ValidationReport {
        database,
        role,
        outcomes,
    };
    tracing::info!(
        %role,
        checked = report.outcomes.len(),
        passed = report.passed(),
        "statement validation finished"
    );
    Ok(report)
}
