use migrator_pipeline::reconciler::Reconciler;
use migrator_repository::LegacySourceError;
use migrator_shared::types::{EntityType, ReconciliationReport};
use tracing::{info, warn};

use crate::config::{Dependencies, Settings};
use crate::MigrationError;

/// Counts and defects of every entity type, fresh from the destination.
/// Legacy counts go through the same retry policy as paging.
pub async fn report(
    deps: &Dependencies,
    settings: &Settings,
    with_source_counts: bool,
) -> Result<ReconciliationReport, MigrationError> {
    let source = if with_source_counts {
        Some(deps.require_source("report --with-source-counts")?)
    } else {
        None
    };
    let reconciler = Reconciler::new(deps.store.clone());

    let mut report = ReconciliationReport::default();
    for entity in EntityType::all() {
        let source_count = match &source {
            Some(source) => Some(
                settings
                    .retry
                    .run(
                        "legacy count",
                        || source.total_count(*entity),
                        LegacySourceError::is_transient,
                    )
                    .await
                    .map_err(|failure| failure.error)?,
            ),
            None => None,
        };
        let entity_report = reconciler.report(*entity, source_count).await?;
        if entity_report.count_mismatch() {
            warn!(
                entity = %entity,
                source = entity_report.source_count,
                destination = entity_report.destination_count,
                "Row count differs from the legacy API"
            );
        }
        report.entities.push(entity_report);
    }

    info!(
        orphans = report.total_orphans(),
        duplicate_rows = report.total_duplicate_rows(),
        ordering_violations = report.total_ordering_violations(),
        "Report finished"
    );
    Ok(report)
}
