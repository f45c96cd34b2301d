use migrator_repository::DestinationStoreError;
use migrator_shared::types::EntityType;
use thiserror::Error;

/// Represents errors that can occur while checking or repairing the
/// destination store.
#[derive(Debug, Error)]
pub enum ReconcilerError {
    #[error("Destination store error: {0}")]
    Store(#[from] DestinationStoreError),

    #[error("{check} does not apply to {entity}")]
    Unsupported {
        entity: EntityType,
        check: &'static str,
    },
}
