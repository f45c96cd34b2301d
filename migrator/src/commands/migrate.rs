use migrator_pipeline::loader::BatchedWriter;
use migrator_pipeline::mapper::IdentifierMapper;
use migrator_pipeline::orchestrator::{MigrationSummary, Orchestrator};
use migrator_pipeline::processor::RecordTransformer;
use migrator_pipeline::reconciler::Reconciler;
use migrator_shared::types::{EntityType, ReconciliationReport};
use tracing::{info, instrument};

use super::ExitStatus;
use crate::config::{Dependencies, Settings};
use crate::MigrationError;

#[derive(Debug, Clone)]
pub struct MigrateOutcome {
    pub summary: MigrationSummary,
    /// Post-migration checks of the migrated types, run in strict mode.
    pub report: Option<ReconciliationReport>,
    pub status: ExitStatus,
}

/// Migrates `entities`, or every type when empty.
#[instrument(skip(deps, settings), fields(dry_run = settings.dry_run))]
pub async fn migrate(
    deps: &Dependencies,
    settings: &Settings,
    entities: &[EntityType],
) -> Result<MigrateOutcome, MigrationError> {
    let source = deps.require_source("migrate")?;
    let entities = if entities.is_empty() {
        EntityType::all().to_vec()
    } else {
        entities.to_vec()
    };

    let rules = settings.load_rules()?;
    let mut mapper = IdentifierMapper::load_from_store(deps.store.as_ref(), EntityType::all()).await?;
    rules.register_aliases(&mut mapper);

    let writer = BatchedWriter::new(deps.store.clone(), settings.retry, settings.dry_run);
    let orchestrator = Orchestrator::new(
        source,
        writer,
        RecordTransformer::new(rules),
        settings.orchestrator_config(),
    );
    let summary = orchestrator.run(&mut mapper, &entities).await?;

    let report = if settings.strict && !settings.dry_run {
        let reconciler = Reconciler::new(deps.store.clone());
        let mut report = ReconciliationReport::default();
        for entity in summary.entities.iter().map(|e| e.entity) {
            report.entities.push(reconciler.report(entity, None).await?);
        }
        Some(report)
    } else {
        None
    };

    let status = if summary.has_failures() {
        ExitStatus::BatchFailed
    } else {
        ExitStatus::from_defects(
            report.as_ref().is_some_and(|r| !r.is_clean()),
            settings.strict,
        )
    };
    info!(status = ?status, "Migrate command finished");
    Ok(MigrateOutcome {
        summary,
        report,
        status,
    })
}
