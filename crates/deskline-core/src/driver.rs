//! Database driver trait definition

use crate::{Connection, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Core driver trait that all database drivers must implement
#[async_trait]
pub trait DatabaseDriver: Send + Sync {
    /// Unique identifier for this driver (e.g., "mysql", "sqlite")
    fn id(&self) -> &'static str {
        self.name()
    }

    /// Human-readable name (e.g., "MySQL", "SQLite")
    fn name(&self) -> &'static str;

    /// Display name for diagnostics output
    fn display_name(&self) -> &'static str {
        self.name()
    }

    /// Default connection port (None for file-based databases like SQLite)
    fn default_port(&self) -> Option<u16> {
        None
    }

    /// Query used to measure replica lag when the pool config does not set one.
    ///
    /// The first row is inspected for a seconds-behind column; see
    /// `deskline_connection::health::measure_replication_lag`.
    fn replication_lag_query(&self) -> Option<&'static str> {
        None
    }

    /// Create a new connection
    async fn connect(&self, config: &ConnectionConfig) -> Result<Arc<dyn Connection>>;

    /// Open a connection, run the liveness probe and close it again
    async fn test_connection(&self, config: &ConnectionConfig) -> Result<()> {
        let conn = self.connect(config).await?;
        let probe = conn.ping().await;
        let _ = conn.close().await;
        probe
    }

    /// Build a connection string from configuration
    fn build_connection_string(&self, config: &ConnectionConfig) -> String;
}

/// Connection configuration handed to a driver
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Display name
    #[serde(default)]
    pub name: String,
    /// Driver ID (e.g., "mysql", "sqlite")
    #[serde(default)]
    pub driver: String,
    /// Host address (empty for file-based databases)
    #[serde(default)]
    pub host: String,
    /// Port number (0 for default or file-based)
    #[serde(default)]
    pub port: u16,
    /// Database name or file path
    #[serde(default)]
    pub database: Option<String>,
    /// Username
    #[serde(default)]
    pub username: Option<String>,
    /// Password
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
    /// Additional connection parameters
    #[serde(default)]
    pub params: HashMap<String, String>,
}

impl ConnectionConfig {
    /// Create a new configuration with default values
    pub fn new(driver: &str, name: &str) -> Self {
        Self {
            name: name.to_string(),
            driver: driver.to_string(),
            ..Default::default()
        }
    }

    /// Create a SQLite configuration
    pub fn new_sqlite(database_path: &str) -> Self {
        let mut config = Self::new("sqlite", "SQLite Database");
        config.database = Some(database_path.to_string());
        config
    }

    /// Create a MySQL configuration
    pub fn new_mysql(host: &str, port: u16, database: &str, username: &str) -> Self {
        let mut config = Self::new("mysql", "MySQL");
        config.host = host.to_string();
        config.port = port;
        config.database = Some(database.to_string());
        config.username = Some(username.to_string());
        config
    }

    /// Set a connection parameter
    pub fn with_param(mut self, key: &str, value: impl Into<String>) -> Self {
        self.params.insert(key.to_string(), value.into());
        self
    }

    /// Set the password
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Get a string parameter
    pub fn get_string(&self, key: &str) -> Option<String> {
        // First check params
        if let Some(val) = self.params.get(key) {
            return Some(val.clone());
        }
        // Check known fields
        match key {
            "host" if !self.host.is_empty() => Some(self.host.clone()),
            "database" | "path" => self.database.clone(),
            "username" | "user" => self.username.clone(),
            "password" => self.password.clone(),
            _ => None,
        }
    }

    /// Get port
    pub fn get_port(&self) -> u16 {
        self.port
    }

    /// Copy of this configuration pointing at another host and port.
    ///
    /// Used when a tunnel exposes the real server on a loopback port.
    pub fn redirected(&self, host: &str, port: u16) -> Self {
        let mut config = self.clone();
        config.host = host.to_string();
        config.port = port;
        config
    }
}
