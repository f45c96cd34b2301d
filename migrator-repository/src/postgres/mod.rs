//! PostgreSQL implementation of the destination store.
//!
//! The schema lives in `migrations/` and is applied with
//! [`PostgresDestinationStore::run_migrations`].
mod destination_store;

pub use destination_store::PostgresDestinationStore;
