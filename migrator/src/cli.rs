//! Command line arguments.
use clap::{Args, Parser, Subcommand};
use migrator_shared::types::EntityType;

#[derive(Debug, Parser)]
#[command(
    name = "migrator",
    version,
    about = "Migrates legacy questionnaire data and reconciles the destination"
)]
pub struct Cli {
    /// Read and transform everything but write nothing
    #[arg(long, global = true)]
    pub dry_run: bool,

    /// Exit with code 3 when orphans, duplicates or ordering defects remain
    #[arg(long, global = true)]
    pub strict: bool,

    /// Rows per destination write
    #[arg(long, global = true, value_name = "N")]
    pub batch_size: Option<usize>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Migrate entity types, always in dependency order (none = all)
    Migrate {
        #[arg(value_name = "ENTITY")]
        entities: Vec<EntityType>,
    },
    /// Check one entity type, optionally repairing what was found
    Reconcile(ReconcileArgs),
    /// Report counts and defects for every entity type
    Report {
        /// Also count records in the legacy API
        #[arg(long)]
        with_source_counts: bool,
    },
}

#[derive(Debug, Clone, Args)]
pub struct ReconcileArgs {
    #[arg(value_name = "ENTITY")]
    pub entity: EntityType,

    /// Renumber broken ordering groups
    #[arg(long)]
    pub repair: bool,

    /// Delete orphaned rows and the rows that depend on them
    #[arg(long)]
    pub delete_orphans: bool,

    /// Delete all but the oldest member of each duplicate group
    #[arg(long)]
    pub delete_duplicates: bool,
}
