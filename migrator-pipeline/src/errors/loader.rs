//! Error types for the loader module of the migrator pipeline.
//! Only errors that must stop the run surface here; a rejected batch is
//! reported in the write outcome instead.
use migrator_repository::DestinationStoreError;
use migrator_shared::types::EntityType;
use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum LoaderError {
    #[error("Batch size must be greater than zero")]
    InvalidBatchSize,

    #[error("Destination unreachable while writing {entity} after {attempts} attempt(s): {source}")]
    DestinationUnreachable {
        entity: EntityType,
        attempts: usize,
        #[source]
        source: DestinationStoreError,
    },

    #[error("{0} rows cannot be created as placeholders")]
    PlaceholderUnsupported(EntityType),

    #[error("Destination store error: {0}")]
    Store(#[from] DestinationStoreError),
}
