//! # Migrator Repository
//! This crate provides the two external collaborators of a migration run
//! behind traits: the legacy application's paginated Data API
//! ([`LegacySource`]) and the relational destination store
//! ([`DestinationStore`]). It includes the error types, a reqwest-based
//! Data API client, a PostgreSQL store, and in-memory implementations of
//! both used by tests and rehearsals.
pub mod errors;
pub mod interfaces;
pub mod legacy;
pub mod memory;
pub mod postgres;

pub use errors::{DestinationStoreError, LegacySourceError};
pub use interfaces::{CascadeDelete, CascadeDeleted, DestinationStore, LegacySource, UpsertedRow};
pub use legacy::{HttpLegacySource, HttpLegacySourceConfig};
pub use memory::{MemoryDestinationStore, MemoryLegacySource};
pub use postgres::PostgresDestinationStore;
