//! This module defines and re-exports the interfaces for the legacy source and
//! the destination store.
mod destination_store;
mod legacy_source;

pub use destination_store::{CascadeDelete, CascadeDeleted, DestinationStore, UpsertedRow};
pub use legacy_source::LegacySource;
