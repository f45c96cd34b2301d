//! Error types for the processor module of the migrator pipeline.
use migrator_shared::types::EntityType;
use thiserror::Error;

/// Represents the reasons a legacy record cannot be turned into a row.
///
/// Both are recoverable: the record is skipped and reported, the run goes on.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProcessorError {
    #[error("{entity} {source_id}: {field} references {references} {target_source_id}, which has no destination row")]
    MissingReference {
        entity: EntityType,
        source_id: String,
        field: &'static str,
        references: EntityType,
        target_source_id: String,
    },

    #[error("{entity} {source_id} is invalid: {reason}")]
    Validation {
        entity: EntityType,
        source_id: String,
        reason: String,
    },
}
