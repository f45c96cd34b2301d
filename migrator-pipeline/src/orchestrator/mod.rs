//! This module defines the `Orchestrator` responsible for running a
//! migration: it pages legacy records, transforms them and writes them, one
//! entity type at a time in dependency order.
//!
//! Batches run strictly one after another. The identifier mapper is the only
//! shared state and is borrowed mutably for the whole run.
mod summary;

use std::collections::BTreeSet;
use std::sync::Arc;

use migrator_repository::LegacySource;
use migrator_shared::types::{DestinationRow, EntityType, LegacyRecord};
use tracing::{info, instrument, warn};

use crate::consumer::LegacyPager;
use crate::errors::{LoaderError, OrchestratorError, ProcessorError};
use crate::loader::{BatchedWriter, DEFAULT_BATCH_SIZE};
use crate::mapper::IdentifierMapper;
use crate::processor::{RecordTransformer, SiblingPositions, SkipReason, Transformed};
use crate::retry::RetryPolicy;

pub use summary::{EntitySummary, IssueKind, MigrationSummary, RecordIssue};

pub const DEFAULT_PAGE_SIZE: u32 = 100;
pub const DEFAULT_SKIP_RATE_THRESHOLD: f64 = 0.5;

#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorConfig {
    pub page_size: u32,
    pub batch_size: usize,
    /// Largest tolerated share of an entity's records skipped for missing
    /// references.
    pub skip_rate_threshold: f64,
    /// Entity types whose missing rows may be stood in for by placeholders.
    pub placeholder_entities: BTreeSet<EntityType>,
    pub retry: RetryPolicy,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            batch_size: DEFAULT_BATCH_SIZE,
            skip_rate_threshold: DEFAULT_SKIP_RATE_THRESHOLD,
            placeholder_entities: BTreeSet::new(),
            retry: RetryPolicy::default(),
        }
    }
}

/// What became of one legacy record.
enum RecordOutcome {
    Row(DestinationRow),
    Issue(RecordIssue),
}

pub struct Orchestrator {
    source: Arc<dyn LegacySource>,
    writer: BatchedWriter,
    transformer: RecordTransformer,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        source: Arc<dyn LegacySource>,
        writer: BatchedWriter,
        transformer: RecordTransformer,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            source,
            writer,
            transformer,
            config,
        }
    }

    /// Migrates `entities`, always in dependency order whatever order they
    /// are given in.
    ///
    /// The mapper should already hold the destination's existing mappings;
    /// rows written during the run are added to it as they land.
    pub async fn run(
        &self,
        mapper: &mut IdentifierMapper,
        entities: &[EntityType],
    ) -> Result<MigrationSummary, OrchestratorError> {
        let mut ordered = entities.to_vec();
        ordered.sort_by_key(EntityType::topological_rank);
        ordered.dedup();
        let mut positions = SiblingPositions::new();
        let mut summary = MigrationSummary {
            dry_run: self.writer.is_dry_run(),
            entities: Vec::with_capacity(ordered.len()),
        };

        info!(
            entities = ?ordered,
            dry_run = summary.dry_run,
            mappings = mapper.len(),
            "Starting migration"
        );
        for entity in ordered {
            let entity_summary = self.migrate_entity(entity, mapper, &mut positions).await?;
            summary.entities.push(entity_summary);
        }
        info!(
            migrated = summary.migrated(),
            skipped = summary.skipped(),
            failed = summary.failed(),
            "Migration finished"
        );
        Ok(summary)
    }

    #[instrument(skip(self, mapper, positions), fields(entity = %entity))]
    async fn migrate_entity(
        &self,
        entity: EntityType,
        mapper: &mut IdentifierMapper,
        positions: &mut SiblingPositions,
    ) -> Result<EntitySummary, OrchestratorError> {
        let mut summary = EntitySummary::new(entity);
        let mut pager = LegacyPager::new(
            self.source.clone(),
            entity,
            self.config.page_size,
            self.config.retry,
        )?;

        while let Some(page) = pager.next_page().await? {
            let records = page.records;
            summary.fetched += records.len() + page.unidentified.len();
            for record in &records {
                positions.observe(record);
            }
            for position in page.unidentified {
                warn!(position, "Skipping record without an id");
                summary.skipped += 1;
                summary.issues.push(RecordIssue {
                    entity,
                    source_id: format!("#{position}"),
                    kind: IssueKind::Validation,
                    detail: format!("result at listing position {position} has no _id"),
                });
            }

            let mut rows = Vec::with_capacity(records.len());
            for record in &records {
                match self.transform_record(record, mapper, positions).await? {
                    RecordOutcome::Row(row) => rows.push(row),
                    RecordOutcome::Issue(issue) => {
                        warn!(
                            source_id = %issue.source_id,
                            kind = ?issue.kind,
                            detail = %issue.detail,
                            "Skipping record"
                        );
                        summary.skipped += 1;
                        summary.issues.push(issue);
                    }
                }
            }

            let outcome = self.writer.write(entity, rows, self.config.batch_size).await?;
            for (source_id, id) in &outcome.written {
                if let Some(source_id) = source_id {
                    mapper.record(entity, source_id, *id)?;
                }
            }
            summary.migrated += outcome.result.inserted;
            summary.skipped += outcome.result.skipped;
            summary.failed += outcome.result.failed;
            summary.issues.extend(outcome.skipped_source_ids.into_iter().map(|source_id| RecordIssue {
                entity,
                source_id,
                kind: IssueKind::RepeatedSourceId,
                detail: "source id repeated within one page".to_string(),
            }));
            summary.issues.extend(outcome.failures.into_iter().flat_map(|failure| {
                let error = failure.error;
                failure.source_ids.into_iter().map(move |source_id| RecordIssue {
                    entity,
                    source_id,
                    kind: IssueKind::WriteFailed,
                    detail: error.clone(),
                })
            }));
        }

        summary.pages = pager.stats().pages;
        let missing = summary.count(IssueKind::MissingReference);
        info!(
            fetched = summary.fetched,
            migrated = summary.migrated,
            skipped = summary.skipped,
            failed = summary.failed,
            missing_references = missing,
            "Entity migrated"
        );

        if summary.fetched > 0
            && missing as f64 / summary.fetched as f64 > self.config.skip_rate_threshold
        {
            return Err(OrchestratorError::SkipRateExceeded {
                entity,
                missing,
                fetched: summary.fetched,
                threshold: self.config.skip_rate_threshold,
            });
        }
        Ok(summary)
    }

    /// Transforms one record, standing in placeholders for missing parents
    /// of the types configured for it.
    async fn transform_record(
        &self,
        record: &LegacyRecord,
        mapper: &mut IdentifierMapper,
        positions: &SiblingPositions,
    ) -> Result<RecordOutcome, OrchestratorError> {
        let issue = |kind, detail: String| {
            RecordOutcome::Issue(RecordIssue {
                entity: record.entity_type,
                source_id: record.source_id.clone(),
                kind,
                detail,
            })
        };

        // One placeholder per reference at most, then the record is settled.
        for _ in 0..=record.entity_type.foreign_keys().len() {
            match self.transformer.transform(record, mapper, positions) {
                Ok(Transformed::Row(row)) => return Ok(RecordOutcome::Row(row)),
                Ok(Transformed::Skip(skip)) => {
                    return Ok(match skip.reason {
                        SkipReason::Excluded => issue(IssueKind::Excluded, "excluded by rules".to_string()),
                        SkipReason::Duplicate { canonical } => {
                            issue(IssueKind::Duplicate, format!("duplicate of {canonical}"))
                        }
                    })
                }
                Err(e @ ProcessorError::Validation { .. }) => {
                    return Ok(issue(IssueKind::Validation, e.to_string()))
                }
                Err(ProcessorError::MissingReference {
                    references,
                    target_source_id,
                    ..
                }) if self.config.placeholder_entities.contains(&references) => {
                    let id = mapper.mint(references, &target_source_id);
                    let writer = &self.writer;
                    let target = target_source_id.as_str();
                    let created = mapper
                        .resolve_or_create(references, target, || async move {
                            writer
                                .create_placeholder(references, target, id)
                                .await
                                .map_err(OrchestratorError::from)
                        })
                        .await;
                    match created {
                        Ok(_) => continue,
                        Err(e @ OrchestratorError::Loader(LoaderError::DestinationUnreachable { .. })) => {
                            return Err(e)
                        }
                        Err(e) => {
                            return Ok(issue(
                                IssueKind::MissingReference,
                                format!("placeholder for {references} {target_source_id} failed: {e}"),
                            ))
                        }
                    }
                }
                Err(e @ ProcessorError::MissingReference { .. }) => {
                    return Ok(issue(IssueKind::MissingReference, e.to_string()))
                }
            }
        }
        Ok(issue(
            IssueKind::MissingReference,
            "references still unresolved after creating placeholders".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use migrator_repository::{MemoryDestinationStore, MemoryLegacySource};
    use serde_json::json;

    use crate::processor::TransformRules;

    fn record(entity: EntityType, source_id: &str, fields: serde_json::Value) -> LegacyRecord {
        LegacyRecord::new(entity, source_id, fields.as_object().cloned().unwrap_or_default())
    }

    fn orchestrator(
        source: Arc<MemoryLegacySource>,
        store: Arc<MemoryDestinationStore>,
        rules: TransformRules,
    ) -> Orchestrator {
        let config = OrchestratorConfig {
            retry: RetryPolicy::no_retry(),
            ..OrchestratorConfig::default()
        };
        Orchestrator::new(
            source,
            BatchedWriter::new(store, config.retry, false),
            RecordTransformer::new(rules),
            config,
        )
    }

    #[tokio::test]
    async fn parents_are_migrated_before_children_whatever_the_order_given() {
        let source = Arc::new(MemoryLegacySource::with_records([
            record(EntityType::Subsection, "sub-1", json!({ "name": "Chemicals", "section": "s-1" })),
            record(EntityType::Section, "s-1", json!({ "name": "Storage" })),
        ]));
        let store = Arc::new(MemoryDestinationStore::new());
        let mut mapper = IdentifierMapper::new();

        let summary = orchestrator(source, store.clone(), TransformRules::default())
            .run(
                &mut mapper,
                &[EntityType::Subsection, EntityType::Section, EntityType::Subsection],
            )
            .await
            .unwrap();

        let order: Vec<EntityType> = summary.entities.iter().map(|e| e.entity).collect();
        assert_eq!(order, vec![EntityType::Section, EntityType::Subsection]);
        assert_eq!(summary.migrated(), 2);
        assert_eq!(mapper.len(), 2);
    }

    #[tokio::test]
    async fn excluded_and_invalid_records_become_issues() {
        let source = Arc::new(MemoryLegacySource::with_records([
            record(EntityType::Company, "co-1", json!({ "name": "Acme" })),
            record(EntityType::Company, "co-2", json!({ "name": "Test artifact" })),
            record(EntityType::Company, "co-3", json!({ "name": "  " })),
        ]));
        let store = Arc::new(MemoryDestinationStore::new());
        let rules = TransformRules::from_json(r#"{ "excluded": { "company": ["co-2"] } }"#).unwrap();

        let summary = orchestrator(source, store.clone(), rules)
            .run(&mut IdentifierMapper::new(), &[EntityType::Company])
            .await
            .unwrap();

        let companies = summary.entity(EntityType::Company).unwrap();
        assert_eq!((companies.fetched, companies.migrated, companies.skipped), (3, 1, 2));
        assert_eq!(companies.count(IssueKind::Excluded), 1);
        assert_eq!(companies.count(IssueKind::Validation), 1);
        assert_eq!(store.rows(EntityType::Company).len(), 1);
    }
}
