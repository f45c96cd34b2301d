//! In-memory implementations of the repository interfaces.
//!
//! They back the pipeline's tests and offline rehearsals of a migration.
//! Both can be told to fail on demand so error paths can be exercised
//! without a network or a database.
mod destination_store;
mod legacy_source;

pub use destination_store::MemoryDestinationStore;
pub use legacy_source::MemoryLegacySource;
