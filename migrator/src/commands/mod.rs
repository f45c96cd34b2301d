//! The `migrate`, `reconcile` and `report` commands.
//!
//! Each command returns a printable outcome; deciding the exit code from it
//! is left to [`ExitStatus`].
mod migrate;
mod reconcile;
mod report;

use std::process::ExitCode;

pub use migrate::{migrate, MigrateOutcome};
pub use reconcile::{reconcile, ReconcileOutcome};
pub use report::report;

use crate::cli::{Cli, Command};
use crate::config::{Dependencies, Settings};
use crate::MigrationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    Success,
    /// Configuration, connectivity, exhausted retries or a skip-rate abort.
    Fatal,
    /// At least one batch was rejected by the destination.
    BatchFailed,
    /// Strict mode and defects remain.
    Unresolved,
}

impl ExitStatus {
    pub fn code(self) -> u8 {
        match self {
            ExitStatus::Success => 0,
            ExitStatus::Fatal => 1,
            ExitStatus::BatchFailed => 2,
            ExitStatus::Unresolved => 3,
        }
    }

    /// Exit status of a command that found `unresolved` defects.
    fn from_defects(unresolved: bool, strict: bool) -> Self {
        if unresolved && strict {
            ExitStatus::Unresolved
        } else {
            ExitStatus::Success
        }
    }
}

impl From<ExitStatus> for ExitCode {
    fn from(status: ExitStatus) -> Self {
        ExitCode::from(status.code())
    }
}

/// Runs the parsed command and prints its outcome to stdout.
pub async fn execute(cli: &Cli, settings: &Settings, deps: &Dependencies) -> Result<ExitStatus, MigrationError> {
    match &cli.command {
        Command::Migrate { entities } => {
            let outcome = migrate(deps, settings, entities).await?;
            println!("{}", outcome.summary);
            if let Some(report) = &outcome.report {
                println!("{}", to_json(report)?);
            }
            Ok(outcome.status)
        }
        Command::Reconcile(args) => {
            let outcome = reconcile(deps, settings, args).await?;
            println!("{}", to_json(&outcome)?);
            Ok(outcome.status(settings.strict))
        }
        Command::Report { with_source_counts } => {
            let report = report(deps, settings, *with_source_counts).await?;
            println!("{}", to_json(&report)?);
            Ok(ExitStatus::from_defects(!report.is_clean(), settings.strict))
        }
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, MigrationError> {
    serde_json::to_string_pretty(value).map_err(|e| MigrationError::config(format!("rendering output: {e}")))
}
