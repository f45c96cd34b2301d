//! # Migrator
//!
//! Command line tool that moves a legacy no-code application's
//! questionnaire data into a relational destination and checks the result.
//!
//! ## Modules
//!
//! - [`cli`]: Command line arguments
//! - [`config`]: Settings and dependency initialization
//! - [`commands`]: The `migrate`, `reconcile` and `report` commands
//! - [`errors`]: Error types for the binary

pub mod cli;
pub mod commands;
pub mod config;
pub mod errors;

pub use config::{Dependencies, Settings};
pub use errors::MigrationError;
