//! Error types for the migrator repository.
//! Consolidates and re-exports the errors raised by the legacy source and the
//! destination store.
mod destination_store;
mod legacy_source;

pub use destination_store::DestinationStoreError;
pub use legacy_source::LegacySourceError;
