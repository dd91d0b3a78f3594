//! Application-wide database state

use std::sync::Arc;

use deskline_core::{DesklineError, LogicalDatabase, Result, StatementRegistry};
use deskline_drivers::DriverRegistry;

use crate::config::DesklineSettings;
use crate::manager::{DatabaseManager, Diagnostics};

/// One [`DatabaseManager`] per logical database plus the shared statement
/// registry. Build it once at startup and pass it (or clones of its
/// managers) to whatever needs database access.
#[derive(Debug)]
pub struct AppContext {
    registry: Arc<StatementRegistry>,
    system: DatabaseManager,
    ticketing: DatabaseManager,
}

impl AppContext {
    /// Create a context with unconfigured pools
    pub fn new(registry: Arc<StatementRegistry>) -> Self {
        Self {
            system: DatabaseManager::new(LogicalDatabase::System, registry.clone()),
            ticketing: DatabaseManager::new(LogicalDatabase::Ticketing, registry.clone()),
            registry,
        }
    }

    /// Load statement catalogs, configure both pools and health-check them.
    ///
    /// A missing database section, an unusable primary or a failing health
    /// check is a startup failure; pools configured so far are shut down.
    #[tracing::instrument(skip_all)]
    pub async fn bootstrap(settings: &DesklineSettings, drivers: &DriverRegistry) -> Result<Self> {
        let registry = Arc::new(StatementRegistry::new());
        for catalog in &settings.statement_catalogs {
            let count = registry.load_catalog_file(catalog).map_err(|e| {
                DesklineError::Configuration(format!(
                    "failed to load statement catalog {}: {}",
                    catalog.display(),
                    e
                ))
            })?;
            tracing::info!(path = %catalog.display(), count, "statement catalog loaded");
        }

        let context = Self::new(registry);
        if let Err(e) = context.start(settings, drivers).await {
            tracing::error!(error = %e, "database startup failed");
            context.shutdown().await;
            return Err(e);
        }
        Ok(context)
    }

    async fn start(&self, settings: &DesklineSettings, drivers: &DriverRegistry) -> Result<()> {
        for database in LogicalDatabase::ALL {
            let section = settings.database(database).ok_or_else(|| {
                DesklineError::Configuration(format!("no settings for the {} database", database))
            })?;
            let targets = section.targets(database, drivers)?;

            let manager = self.manager(database);
            manager.configure(section.pool.clone(), targets).await?;
            let status = manager.health_check().await?;
            tracing::info!(%database, %status, "database ready");
        }
        Ok(())
    }

    pub fn registry(&self) -> &Arc<StatementRegistry> {
        &self.registry
    }

    pub fn manager(&self, database: LogicalDatabase) -> &DatabaseManager {
        match database {
            LogicalDatabase::System => &self.system,
            LogicalDatabase::Ticketing => &self.ticketing,
        }
    }

    pub fn system(&self) -> &DatabaseManager {
        &self.system
    }

    pub fn ticketing(&self) -> &DatabaseManager {
        &self.ticketing
    }

    pub fn diagnostics(&self) -> Vec<Diagnostics> {
        LogicalDatabase::ALL
            .into_iter()
            .map(|database| self.manager(database).diagnostics())
            .collect()
    }

    /// Shut both pools down. Idempotent.
    pub async fn shutdown(&self) {
        self.system.shutdown().await;
        self.ticketing.shutdown().await;
    }
}
