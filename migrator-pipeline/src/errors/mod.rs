//! Error types for the migrator pipeline, one module per pipeline stage.
mod consumer;
mod loader;
mod mapper;
mod orchestrator;
mod processor;
mod reconciler;

pub use consumer::ConsumerError;
pub use loader::LoaderError;
pub use mapper::MapperError;
pub use orchestrator::OrchestratorError;
pub use processor::ProcessorError;
pub use reconciler::ReconcilerError;
