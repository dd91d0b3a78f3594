//! Driver registry for managing available database drivers

use std::collections::HashMap;
use std::sync::Arc;
use deskline_core::{DatabaseDriver, DesklineError, Result};

/// Registry of available database drivers
pub struct DriverRegistry {
    drivers: HashMap<String, Arc<dyn DatabaseDriver>>,
}

impl DriverRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            drivers: HashMap::new(),
        }
    }

    /// Create a registry with all built-in drivers registered
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();

        #[cfg(feature = "sqlite")]
        registry.register(Arc::new(crate::sqlite::SqliteDriver::new()));
        #[cfg(feature = "mysql")]
        registry.register(Arc::new(crate::mysql::MySqlDriver::new()));

        registry
    }

    /// Register a new driver
    pub fn register(&mut self, driver: Arc<dyn DatabaseDriver>) {
        let name = driver.name().to_string();
        tracing::info!(driver = %name, "registering database driver");
        self.drivers.insert(name, driver);
    }

    /// Get a driver by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn DatabaseDriver>> {
        let driver = self.drivers.get(&normalize(name)).cloned();
        if driver.is_none() {
            tracing::warn!(driver = %name, "driver not found in registry");
        }
        driver
    }

    /// Get a driver by name, failing with a configuration error
    pub fn require(&self, name: &str) -> Result<Arc<dyn DatabaseDriver>> {
        self.get(name).ok_or_else(|| {
            DesklineError::Configuration(format!(
                "Unknown database driver '{}' (available: {})",
                name,
                self.list().join(", ")
            ))
        })
    }

    /// List all registered driver names, sorted
    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.drivers.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Check if a driver is registered
    pub fn has(&self, name: &str) -> bool {
        self.drivers.contains_key(&normalize(name))
    }
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

fn normalize(name: &str) -> String {
    match name.trim().to_lowercase().as_str() {
        "mariadb" => "mysql".to_string(),
        "sqlite3" => "sqlite".to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_registry_rejects_unknown_driver() {
        let registry = DriverRegistry::new();
        let err = registry.require("postgres").err().unwrap();
        assert!(matches!(err, DesklineError::Configuration(_)));
    }

    #[cfg(all(feature = "sqlite", feature = "mysql"))]
    #[test]
    fn test_defaults_register_builtin_drivers() {
        let registry = DriverRegistry::with_defaults();
        assert_eq!(registry.list(), vec!["mysql", "sqlite"]);
        assert!(registry.has("MariaDB"));
        assert!(registry.get("sqlite3").is_some());
    }
}
