//! Error types for the migrator binary.
use migrator_pipeline::errors::{MapperError, OrchestratorError, ReconcilerError};
use migrator_repository::{DestinationStoreError, LegacySourceError};
use thiserror::Error;

/// Errors that end a command. Every variant maps to exit code 1.
#[derive(Error, Debug)]
pub enum MigrationError {
    /// Missing or invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Migration error: {0}")]
    Orchestrator(#[from] OrchestratorError),

    #[error("Reconciliation error: {0}")]
    Reconciler(#[from] ReconcilerError),

    #[error("Mapper error: {0}")]
    Mapper(#[from] MapperError),

    #[error("Destination store error: {0}")]
    Store(#[from] DestinationStoreError),

    #[error("Legacy source error: {0}")]
    Source(#[from] LegacySourceError),
}

impl MigrationError {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}
