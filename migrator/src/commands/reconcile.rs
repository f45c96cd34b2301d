use migrator_pipeline::reconciler::{DeletionSummary, Reconciler, RepairSummary};
use migrator_shared::types::{DuplicateGroup, EntityType, OrderingViolation, OrphanRow};
use serde::Serialize;
use tracing::{info, instrument, warn};

use super::ExitStatus;
use crate::cli::ReconcileArgs;
use crate::config::{Dependencies, Settings};
use crate::MigrationError;

/// Findings of one `reconcile` run and the repairs it made.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconcileOutcome {
    pub entity: Option<EntityType>,
    pub dry_run: bool,
    pub orphans: Vec<OrphanRow>,
    pub duplicates: Vec<DuplicateGroup>,
    pub ordering_violations: Vec<OrderingViolation>,
    pub deleted_orphans: Option<DeletionSummary>,
    pub deleted_duplicates: Option<DeletionSummary>,
    pub ordering_repair: Option<RepairSummary>,
}

impl ReconcileOutcome {
    /// Whether any finding was left in place.
    pub fn unresolved(&self) -> bool {
        (!self.orphans.is_empty() && self.deleted_orphans.is_none())
            || (!self.duplicates.is_empty() && self.deleted_duplicates.is_none())
            || (!self.ordering_violations.is_empty() && self.ordering_repair.is_none())
    }

    pub fn status(&self, strict: bool) -> ExitStatus {
        ExitStatus::from_defects(self.unresolved(), strict)
    }
}

/// Checks one entity type. Deletions and repairs only happen when asked
/// for, and never on a dry run.
#[instrument(skip(deps, settings), fields(entity = %args.entity, dry_run = settings.dry_run))]
pub async fn reconcile(
    deps: &Dependencies,
    settings: &Settings,
    args: &ReconcileArgs,
) -> Result<ReconcileOutcome, MigrationError> {
    let entity = args.entity;
    let reconciler = Reconciler::new(deps.store.clone());
    let mut outcome = ReconcileOutcome {
        entity: Some(entity),
        dry_run: settings.dry_run,
        ..ReconcileOutcome::default()
    };

    outcome.orphans = reconciler.detect_orphans(entity).await?;
    if entity.content_column().is_some() {
        outcome.duplicates = reconciler.detect_duplicates(entity).await?;
    }
    if entity.is_ordered() {
        outcome.ordering_violations = reconciler.detect_ordering_violations(entity).await?;
    } else if args.repair {
        warn!("Ordering repair requested for an unordered entity type, nothing to do");
    }

    if settings.dry_run {
        if args.delete_orphans || args.delete_duplicates || args.repair {
            info!(
                orphans = outcome.orphans.len(),
                duplicate_groups = outcome.duplicates.len(),
                ordering_violations = outcome.ordering_violations.len(),
                "Dry run, leaving findings in place"
            );
        }
        return Ok(outcome);
    }

    if args.delete_orphans && !outcome.orphans.is_empty() {
        outcome.deleted_orphans = Some(reconciler.delete_orphans(entity, &outcome.orphans).await?);
    }
    if args.delete_duplicates && !outcome.duplicates.is_empty() {
        outcome.deleted_duplicates = Some(reconciler.delete_duplicates(entity, &outcome.duplicates).await?);
    }
    if args.repair && !outcome.ordering_violations.is_empty() {
        outcome.ordering_repair = Some(reconciler.repair_ordering(entity).await?);
    }
    Ok(outcome)
}
