//! MySQL driver implementation

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use deskline_core::{Connection, ConnectionConfig, DatabaseDriver, Result};

use crate::MySqlConnection;

const DEFAULT_PORT: u16 = 3306;
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;

/// MySQL database driver
pub struct MySqlDriver;

impl MySqlDriver {
    /// Create a new MySQL driver instance
    pub fn new() -> Self {
        tracing::debug!("MySQL driver initialized");
        Self
    }
}

impl Default for MySqlDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DatabaseDriver for MySqlDriver {
    fn name(&self) -> &'static str {
        "mysql"
    }

    fn display_name(&self) -> &'static str {
        "MySQL"
    }

    fn default_port(&self) -> Option<u16> {
        Some(DEFAULT_PORT)
    }

    fn replication_lag_query(&self) -> Option<&'static str> {
        Some("SHOW REPLICA STATUS")
    }

    #[tracing::instrument(skip(self, config), fields(host = config.get_string("host").as_deref(), database = config.get_string("database").as_deref()))]
    async fn connect(&self, config: &ConnectionConfig) -> Result<Arc<dyn Connection>> {
        let host = config
            .get_string("host")
            .unwrap_or_else(|| "localhost".to_string());
        let port = if config.port > 0 { config.port } else { DEFAULT_PORT };
        let database = config.get_string("database");
        let user = config
            .get_string("user")
            .or_else(|| config.get_string("username"));
        let password = config.get_string("password");
        let connect_timeout = config
            .get_string("connect_timeout")
            .and_then(|raw| raw.parse::<u64>().ok())
            .unwrap_or(DEFAULT_CONNECT_TIMEOUT_SECS);

        let conn = MySqlConnection::connect(
            &host,
            port,
            database.as_deref(),
            user.as_deref(),
            password.as_deref(),
            Duration::from_secs(connect_timeout),
        )
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "failed to connect to MySQL database");
            e
        })?;

        tracing::info!(host = %host, port = %port, database = ?database, "MySQL connection created");
        Ok(Arc::new(conn))
    }

    /// Connection URL without the password
    fn build_connection_string(&self, config: &ConnectionConfig) -> String {
        let host = config
            .get_string("host")
            .unwrap_or_else(|| "localhost".to_string());
        let port = if config.port > 0 { config.port } else { DEFAULT_PORT };
        let user = config
            .get_string("user")
            .or_else(|| config.get_string("username"));

        let mut conn_str = String::from("mysql://");
        if let Some(u) = user {
            conn_str.push_str(&u);
            conn_str.push('@');
        }
        conn_str.push_str(&format!("{}:{}", host, port));
        if let Some(db) = config.get_string("database") {
            conn_str.push('/');
            conn_str.push_str(&db);
        }
        conn_str
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_string_defaults_port_and_hides_password() {
        let driver = MySqlDriver::new();
        let config = ConnectionConfig::new_mysql("db.internal", 0, "ticketing", "deskline")
            .with_password("s3cret");

        let url = driver.build_connection_string(&config);
        assert_eq!(url, "mysql://deskline@db.internal:3306/ticketing");
    }

    #[test]
    fn test_driver_reports_lag_query() {
        assert_eq!(
            MySqlDriver::new().replication_lag_query(),
            Some("SHOW REPLICA STATUS")
        );
    }
}
