//! # Migrator Pipeline
//! This crate moves legacy records into the destination store and checks the
//! result. It includes the cursor pager (consumer), the identifier mapper,
//! the record transformer (processor), the batched writer (loader), the
//! reconciliation checks and the orchestrator tying them together, along
//! with their error types and the retry policy they share.
pub mod consumer;
pub mod loader;
pub mod mapper;
pub mod orchestrator;
pub mod processor;
pub mod reconciler;
pub mod retry;

pub mod errors;
