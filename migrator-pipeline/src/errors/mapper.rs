use migrator_repository::DestinationStoreError;
use migrator_shared::types::EntityType;
use thiserror::Error;
use uuid::Uuid;

/// Represents errors raised by the identifier mapper.
#[derive(Debug, Error, Clone)]
pub enum MapperError {
    /// The pair is already bound to another destination id.
    #[error("{entity} {source_id} is mapped to {existing}, refusing to remap it to {attempted}")]
    MappingConflict {
        entity: EntityType,
        source_id: String,
        existing: Uuid,
        attempted: Uuid,
    },

    #[error("No destination id for {entity} {source_id}")]
    Unmapped { entity: EntityType, source_id: String },

    #[error("Failed to load mappings: {0}")]
    Store(#[from] DestinationStoreError),
}
