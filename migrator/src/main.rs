//! Migrator Main Entry Point

use std::env;
use std::process::ExitCode;

use clap::Parser;
use dotenv::dotenv;
use migrator::cli::Cli;
use migrator::commands::{self, ExitStatus};
use migrator::{Dependencies, MigrationError, Settings};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize tracing/logging.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("migrator=info,migrator_pipeline=info,migrator_repository=info")
    });

    if env::var("LOG_FORMAT").is_ok_and(|format| format.eq_ignore_ascii_case("json")) {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .pretty()
                    .with_writer(std::io::stderr),
            )
            .init();
    }

    info!(
        service_name = "migrator",
        service_version = env!("CARGO_PKG_VERSION"),
        "Tracing initialized"
    );
}

async fn run(cli: &Cli) -> Result<ExitStatus, MigrationError> {
    let settings = Settings::from_env()?.apply_cli(cli)?;
    let deps = Dependencies::new(&settings).await?;
    commands::execute(cli, &settings, &deps).await
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load environment variables from .env file
    dotenv().ok();

    let cli = Cli::parse();
    init_tracing();

    match run(&cli).await {
        Ok(status) => {
            info!(exit_code = status.code(), "Migrator finished");
            status.into()
        }
        Err(e) => {
            error!(error = %e, "Migrator failed");
            ExitStatus::Fatal.into()
        }
    }
}
