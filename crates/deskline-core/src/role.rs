//! Connection roles and statement role affinity

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::DesklineError;

/// Whether a connection serves callers that await the result directly or
/// work submitted to the async executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionRole {
    Sync,
    Async,
}

impl ConnectionRole {
    pub const ALL: [ConnectionRole; 2] = [ConnectionRole::Sync, ConnectionRole::Async];

    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionRole::Sync => "sync",
            ConnectionRole::Async => "async",
        }
    }
}

impl fmt::Display for ConnectionRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConnectionRole {
    type Err = DesklineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sync" => Ok(ConnectionRole::Sync),
            "async" => Ok(ConnectionRole::Async),
            other => Err(DesklineError::Configuration(format!(
                "Unknown connection role '{}', expected 'sync' or 'async'",
                other
            ))),
        }
    }
}

/// Which connection roles a registered statement may run on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleAffinity {
    SyncOnly,
    AsyncOnly,
    #[default]
    Both,
}

impl RoleAffinity {
    pub fn allows(&self, role: ConnectionRole) -> bool {
        match self {
            RoleAffinity::Both => true,
            RoleAffinity::SyncOnly => role == ConnectionRole::Sync,
            RoleAffinity::AsyncOnly => role == ConnectionRole::Async,
        }
    }
}

impl fmt::Display for RoleAffinity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RoleAffinity::SyncOnly => "sync_only",
            RoleAffinity::AsyncOnly => "async_only",
            RoleAffinity::Both => "both",
        })
    }
}
