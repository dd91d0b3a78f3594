//! Settings file for the logical databases
//!
//! ```toml
//! statement_catalogs = ["statements.toml"]
//!
//! [ticketing]
//! driver = "mysql"
//!
//! [ticketing.primary]
//! host = "db.internal"
//! database = "ticketing"
//! username = "deskline"
//!
//! [ticketing.primary.tunnel]
//! host = "bastion.example.com"
//! username = "deploy"
//! private_key_path = "~/.ssh/id_ed25519"
//!
//! [ticketing.pool.sync]
//! min_size = 2
//! max_size = 10
//! max_queue_depth = 8
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context as _;
use deskline_core::{ConnectionConfig, DatabaseDriver, DesklineError, LogicalDatabase, Result, SshTunnelConfig};
use deskline_drivers::DriverRegistry;
use serde::{Deserialize, Serialize};

use crate::connection::Endpoint;
use crate::pool::{PoolConfig, PoolTargets};

/// Top-level settings: one section per logical database
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DesklineSettings {
    pub system: Option<DatabaseSettings>,
    pub ticketing: Option<DatabaseSettings>,
    /// Statement catalog files; relative paths resolve against the settings file
    pub statement_catalogs: Vec<PathBuf>,
}

/// How to reach one logical database and how to pool its connections
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// Driver id, e.g. `mysql` or `sqlite`
    pub driver: String,
    pub primary: EndpointSettings,
    #[serde(default)]
    pub replica: Option<EndpointSettings>,
    #[serde(default)]
    pub pool: PoolConfig,
}

/// One database server, optionally behind an SSH tunnel
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EndpointSettings {
    #[serde(default)]
    pub host: String,
    /// 0 uses the driver's default port
    #[serde(default)]
    pub port: u16,
    /// Database name, or file path for SQLite
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
    /// Inactive endpoints are never connected
    #[serde(default = "default_active")]
    pub active: bool,
    /// Driver specific options
    #[serde(default)]
    pub params: HashMap<String, String>,
    #[serde(default)]
    pub tunnel: Option<SshTunnelConfig>,
}

fn default_active() -> bool {
    true
}

impl DesklineSettings {
    /// `<config dir>/deskline/deskline.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("deskline").join("deskline.toml"))
    }

    pub fn from_toml_str(source: &str) -> Result<Self> {
        toml::from_str(source)
            .map_err(|e| DesklineError::Configuration(format!("Invalid settings: {}", e)))
    }

    /// Read and parse a settings file
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let source = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read settings file {}", path.display()))?;
        let mut settings = Self::from_toml_str(&source)
            .with_context(|| format!("failed to parse settings file {}", path.display()))?;

        if let Some(base) = path.parent() {
            for catalog in &mut settings.statement_catalogs {
                if catalog.is_relative() {
                    *catalog = base.join(&*catalog);
                }
            }
        }
        tracing::debug!(path = %path.display(), "settings loaded");
        Ok(settings)
    }

    /// Load from `path`, or from [`DesklineSettings::default_path`]
    pub fn load_or_default_path(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => {
                let path = Self::default_path().context("no configuration directory on this platform")?;
                Self::load(&path)
            }
        }
    }

    /// Write the settings as TOML, creating parent directories. Secrets are
    /// never written.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let content = toml::to_string_pretty(self).context("failed to serialize settings")?;
        std::fs::write(path, content)
            .with_context(|| format!("failed to write settings file {}", path.display()))?;
        tracing::info!(path = %path.display(), "settings saved");
        Ok(())
    }

    pub fn database(&self, database: LogicalDatabase) -> Option<&DatabaseSettings> {
        match database {
            LogicalDatabase::System => self.system.as_ref(),
            LogicalDatabase::Ticketing => self.ticketing.as_ref(),
        }
    }
}

impl DatabaseSettings {
    /// Resolve the driver and build the pool's endpoints
    pub fn targets(&self, database: LogicalDatabase, drivers: &DriverRegistry) -> Result<PoolTargets> {
        let driver = drivers.require(&self.driver)?;
        let primary = self.primary.endpoint(format!("{}/primary", database), &self.driver, driver.clone());
        let mut targets = PoolTargets::new(primary);
        if let Some(replica) = &self.replica {
            targets = targets.with_replica(replica.endpoint(format!("{}/replica", database), &self.driver, driver));
        }
        Ok(targets)
    }
}

impl EndpointSettings {
    pub fn connection_config(&self, driver: &str, name: &str) -> ConnectionConfig {
        let mut config = ConnectionConfig::new(driver, name);
        config.host = self.host.clone();
        config.port = self.port;
        config.database = self.database.clone();
        config.username = self.username.clone();
        config.password = self.password.clone();
        config.params = self.params.clone();
        config
    }

    fn endpoint(&self, label: String, driver_id: &str, driver: Arc<dyn DatabaseDriver>) -> Endpoint {
        let config = self.connection_config(driver_id, &label);
        let mut endpoint = Endpoint::new(label, driver, config);
        if let Some(tunnel) = &self.tunnel {
            endpoint = endpoint.with_tunnel(tunnel.clone());
        }
        if !self.active {
            endpoint = endpoint.inactive();
        }
        endpoint
    }
}
