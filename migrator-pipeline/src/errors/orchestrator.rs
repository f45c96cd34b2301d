//! Error types for the orchestrator module of the migrator pipeline.
//! Every variant aborts the migration run.
use migrator_shared::types::EntityType;
use thiserror::Error;

use crate::errors::{ConsumerError, LoaderError, MapperError};

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Consumer error: {0}")]
    Consumer(#[from] ConsumerError),

    #[error("Loader error: {0}")]
    Loader(#[from] LoaderError),

    #[error("Mapper error: {0}")]
    Mapper(#[from] MapperError),

    /// Too many records of one type point at rows that do not exist, which
    /// usually means a schema mismatch rather than bad data.
    #[error("{entity}: {missing} of {fetched} records had missing references, above the {threshold} skip-rate threshold")]
    SkipRateExceeded {
        entity: EntityType,
        missing: usize,
        fetched: usize,
        threshold: f64,
    },
}
