//! Dependency initialization and wiring for the migrator.

use std::sync::Arc;

use migrator_repository::{
    DestinationStore, HttpLegacySource, LegacySource, PostgresDestinationStore,
};
use tracing::info;

use crate::config::Settings;
use crate::MigrationError;

/// Container for the external collaborators of a command.
pub struct Dependencies {
    pub store: Arc<dyn DestinationStore>,
    /// Present when a legacy API is configured.
    pub source: Option<Arc<dyn LegacySource>>,
}

impl Dependencies {
    /// Connects to the destination store and builds the legacy API client.
    ///
    /// # Returns
    ///
    /// * `Ok(Dependencies)` - The store answered a ping
    /// * `Err(MigrationError)` - The store is unreachable, its schema could
    ///   not be applied, or the API client could not be built
    pub async fn new(settings: &Settings) -> Result<Self, MigrationError> {
        info!(
            max_connections = settings.database_max_connections,
            legacy_api = settings.legacy_api.as_ref().map(|api| api.base_url.as_str()),
            "Initializing dependencies"
        );

        let store =
            PostgresDestinationStore::connect(&settings.database_url, settings.database_max_connections).await?;
        if settings.run_migrations {
            store.run_migrations().await?;
            info!("Destination schema is up to date");
        }
        store.ping().await?;

        let source = match &settings.legacy_api {
            Some(config) => Some(Arc::new(HttpLegacySource::new(config.clone())?) as Arc<dyn LegacySource>),
            None => None,
        };

        Ok(Self::with(Arc::new(store), source))
    }

    pub fn with(store: Arc<dyn DestinationStore>, source: Option<Arc<dyn LegacySource>>) -> Self {
        Self { store, source }
    }

    /// The legacy source, or a configuration error naming what needs it.
    pub fn require_source(&self, purpose: &str) -> Result<Arc<dyn LegacySource>, MigrationError> {
        self.source.clone().ok_or_else(|| {
            MigrationError::config(format!(
                "{purpose} needs LEGACY_API_URL and LEGACY_API_TOKEN"
            ))
        })
    }
}
