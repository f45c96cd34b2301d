//! # Migrator Shared
//! This crate defines the data structures shared across the migrator crates:
//! the entity types of the questionnaire schema and their table metadata,
//! raw and typed legacy records, typed destination rows, and the value types
//! produced by reconciliation.
pub mod types;
