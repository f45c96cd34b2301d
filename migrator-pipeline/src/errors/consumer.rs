//! Error types for the consumer module of the migrator pipeline.
//! Defines the errors that end the paging of a legacy listing.
use migrator_repository::LegacySourceError;
use migrator_shared::types::EntityType;
use thiserror::Error;

/// Represents errors that can occur while paging through the legacy API.
///
/// All of them are fatal for the run: continuing would leave a hole in the
/// migrated data that nothing downstream would notice.
#[derive(Debug, Error, Clone)]
pub enum ConsumerError {
    #[error("Page size must be greater than zero")]
    InvalidPageSize,

    #[error("Fetching {entity} at cursor {cursor} failed after {attempts} attempt(s): {source}")]
    Source {
        entity: EntityType,
        cursor: u64,
        attempts: usize,
        #[source]
        source: LegacySourceError,
    },

    #[error("Cursor stalled for {entity} at {cursor}: empty page with {remaining} record(s) remaining")]
    StalledCursor {
        entity: EntityType,
        cursor: u64,
        remaining: u64,
    },
}
