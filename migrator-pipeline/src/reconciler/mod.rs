//! Post-migration checks over the destination store.
//!
//! Every check is read-only. Repairs are separate calls the operator opts
//! into: renumbering broken ordering groups, deleting orphans, and deleting
//! content duplicates. Deletions cascade through required references so they
//! never leave new orphans behind.
mod ordering;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use migrator_repository::{CascadeDelete, DestinationStore};
use migrator_shared::types::{
    normalize_content, DuplicateGroup, EntityReport, EntityType, OrderingViolation, OrphanRow,
};
use serde::Serialize;
use tracing::{info, instrument, warn};
use uuid::Uuid;

pub use crate::errors::ReconcilerError;
pub use ordering::{plan_repair, violations, RepairPlan};

/// What a cascading delete removed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeletionSummary {
    /// Rows deleted per entity type.
    pub deleted: BTreeMap<EntityType, u64>,
    /// Optional references set to null because their target was deleted.
    pub cleared_references: u64,
}

impl DeletionSummary {
    pub fn total_deleted(&self) -> u64 {
        self.deleted.values().sum()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RepairSummary {
    pub groups_repaired: usize,
    pub rows_updated: usize,
}

pub struct Reconciler {
    store: Arc<dyn DestinationStore>,
}

impl Reconciler {
    pub fn new(store: Arc<dyn DestinationStore>) -> Self {
        Self { store }
    }

    #[instrument(skip(self), fields(entity = %entity))]
    pub async fn detect_orphans(&self, entity: EntityType) -> Result<Vec<OrphanRow>, ReconcilerError> {
        let orphans = self.store.find_orphans(entity).await?;
        if !orphans.is_empty() {
            warn!(count = orphans.len(), "Orphaned rows found");
        }
        Ok(orphans)
    }

    /// Deletes `orphans` and every row that requires one of them.
    pub async fn delete_orphans(
        &self,
        entity: EntityType,
        orphans: &[OrphanRow],
    ) -> Result<DeletionSummary, ReconcilerError> {
        let ids: BTreeSet<Uuid> = orphans
            .iter()
            .filter(|orphan| orphan.entity == entity)
            .map(|orphan| orphan.id)
            .collect();
        self.delete_cascade(entity, ids).await
    }

    #[instrument(skip(self), fields(entity = %entity))]
    pub async fn detect_duplicates(&self, entity: EntityType) -> Result<Vec<DuplicateGroup>, ReconcilerError> {
        if entity.content_column().is_none() {
            return Err(ReconcilerError::Unsupported {
                entity,
                check: "duplicate detection",
            });
        }

        let mut groups: BTreeMap<(Option<Uuid>, String), Vec<_>> = BTreeMap::new();
        for member in self.store.group_members(entity).await? {
            let Some(content) = member.content.as_deref().map(normalize_content) else {
                continue;
            };
            if content.is_empty() {
                continue;
            }
            groups
                .entry((member.parent_id, content))
                .or_default()
                .push((member.created_at, member.id));
        }

        let duplicates: Vec<DuplicateGroup> = groups
            .into_iter()
            .filter(|(_, members)| members.len() > 1)
            .map(|((parent_id, normalized_content), mut members)| {
                members.sort();
                DuplicateGroup {
                    entity,
                    parent_id,
                    normalized_content,
                    members: members.into_iter().map(|(_, id)| id).collect(),
                }
            })
            .collect();
        if !duplicates.is_empty() {
            warn!(groups = duplicates.len(), "Duplicate content found");
        }
        Ok(duplicates)
    }

    /// Deletes every member of `groups` but the oldest, with their dependents.
    pub async fn delete_duplicates(
        &self,
        entity: EntityType,
        groups: &[DuplicateGroup],
    ) -> Result<DeletionSummary, ReconcilerError> {
        let ids: BTreeSet<Uuid> = groups
            .iter()
            .filter(|group| group.entity == entity)
            .flat_map(|group| group.redundant().iter().copied())
            .collect();
        self.delete_cascade(entity, ids).await
    }

    #[instrument(skip(self), fields(entity = %entity))]
    pub async fn detect_ordering_violations(
        &self,
        entity: EntityType,
    ) -> Result<Vec<OrderingViolation>, ReconcilerError> {
        if !entity.is_ordered() {
            return Err(ReconcilerError::Unsupported {
                entity,
                check: "ordering checks",
            });
        }
        let members = self.store.group_members(entity).await?;
        Ok(violations(entity, &members))
    }

    /// Renumbers every broken ordering group of `entity` to `1..=n`.
    #[instrument(skip(self), fields(entity = %entity))]
    pub async fn repair_ordering(&self, entity: EntityType) -> Result<RepairSummary, ReconcilerError> {
        if !entity.is_ordered() {
            return Err(ReconcilerError::Unsupported {
                entity,
                check: "ordering repair",
            });
        }
        let members = self.store.group_members(entity).await?;
        let plan = plan_repair(&members);
        let summary = RepairSummary {
            groups_repaired: plan.groups,
            rows_updated: plan.updates.len(),
        };
        if !plan.updates.is_empty() {
            self.store.update_order_numbers(entity, &plan.updates).await?;
        }
        info!(
            groups = summary.groups_repaired,
            rows = summary.rows_updated,
            "Ordering repaired"
        );
        Ok(summary)
    }

    /// Counts and defects of `entity`; `source_count` comes from the legacy
    /// API when the caller has it.
    pub async fn report(
        &self,
        entity: EntityType,
        source_count: Option<u64>,
    ) -> Result<EntityReport, ReconcilerError> {
        let destination_count = self.store.count_rows(entity).await?;
        let orphans = self.detect_orphans(entity).await?.len();
        let duplicate_rows = if entity.content_column().is_some() {
            self.detect_duplicates(entity)
                .await?
                .iter()
                .map(|group| group.redundant().len())
                .sum()
        } else {
            0
        };
        let ordering_violations = if entity.is_ordered() {
            self.detect_ordering_violations(entity).await?.len()
        } else {
            0
        };

        Ok(EntityReport {
            entity,
            source_count,
            destination_count,
            orphans,
            duplicate_rows,
            ordering_violations,
        })
    }

    /// Deletes `ids` of `entity` together with everything that requires them,
    /// dependents first. Optional references to deleted rows are cleared.
    /// The whole cascade is one store transaction.
    async fn delete_cascade(
        &self,
        entity: EntityType,
        ids: BTreeSet<Uuid>,
    ) -> Result<DeletionSummary, ReconcilerError> {
        let mut doomed: BTreeMap<EntityType, BTreeSet<Uuid>> = BTreeMap::new();
        let mut to_clear: Vec<(EntityType, &'static str, Vec<Uuid>)> = Vec::new();
        let mut pending = vec![(entity, ids)];

        while let Some((current, ids)) = pending.pop() {
            let fresh: Vec<Uuid> = {
                let known = doomed.entry(current).or_default();
                ids.into_iter().filter(|id| known.insert(*id)).collect()
            };
            if fresh.is_empty() {
                continue;
            }
            for (dependent, fk) in current.dependents() {
                if fk.required {
                    let children = self
                        .store
                        .find_referencing_ids(dependent, fk.column, &fresh)
                        .await?;
                    if !children.is_empty() {
                        pending.push((dependent, children.into_iter().collect()));
                    }
                } else {
                    to_clear.push((dependent, fk.column, fresh.clone()));
                }
            }
        }

        // Reverse topological order: children go before their parents.
        let plan = CascadeDelete {
            clear: to_clear,
            delete: doomed
                .into_iter()
                .rev()
                .filter(|(_, ids)| !ids.is_empty())
                .map(|(target, ids)| (target, ids.into_iter().collect()))
                .collect(),
        };
        let applied = self.store.delete_cascade(&plan).await?;

        let mut summary = DeletionSummary {
            cleared_references: applied.cleared_references,
            ..DeletionSummary::default()
        };
        for (target, deleted) in applied.deleted {
            warn!(entity = %target, deleted, "Deleted rows");
            summary.deleted.insert(target, deleted);
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, Utc};
    use migrator_repository::MemoryDestinationStore;
    use migrator_shared::types::{AnswerRow, ChoiceRow, DestinationRow, QuestionRow, SheetRow};

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::<Utc>::UNIX_EPOCH + Duration::seconds(secs)
    }

    fn question(id: u128, subsection: u128, content: &str, order: Option<i32>, created: i64) -> DestinationRow {
        DestinationRow::Question(QuestionRow {
            id: Uuid::from_u128(id),
            source_id: Some(format!("q-{id}")),
            subsection_id: Uuid::from_u128(subsection),
            content: content.to_string(),
            question_type: "text".to_string(),
            order_number: order,
            created_at: at(created),
        })
    }

    fn choice(id: u128, question: u128) -> DestinationRow {
        DestinationRow::Choice(ChoiceRow {
            id: Uuid::from_u128(id),
            source_id: None,
            question_id: Uuid::from_u128(question),
            content: format!("choice {id}"),
            order_number: Some(1),
            created_at: at(0),
        })
    }

    fn answer(id: u128, sheet: u128, question: u128, choice: Option<u128>) -> DestinationRow {
        DestinationRow::Answer(AnswerRow {
            id: Uuid::from_u128(id),
            source_id: None,
            sheet_id: Uuid::from_u128(sheet),
            question_id: Uuid::from_u128(question),
            choice_id: choice.map(Uuid::from_u128),
            value: None,
            created_at: at(0),
        })
    }

    #[tokio::test]
    async fn orphan_delete_cascades_to_dependents() {
        let store = Arc::new(MemoryDestinationStore::new());
        // Question 1 points at a subsection that does not exist.
        store.insert_raw(question(1, 900, "Orphan?", Some(1), 0));
        store.insert_raw(choice(10, 1));
        store.insert_raw(DestinationRow::Sheet(SheetRow {
            id: Uuid::from_u128(50),
            source_id: None,
            company_id: Uuid::from_u128(901),
            created_by: None,
            name: "Sheet".to_string(),
            created_at: at(0),
        }));
        store.insert_raw(answer(20, 50, 1, Some(10)));

        let reconciler = Reconciler::new(store.clone());
        let orphans = reconciler.detect_orphans(EntityType::Question).await.unwrap();
        assert_eq!(orphans.len(), 1);
        assert_eq!(orphans[0].missing_parent, Uuid::from_u128(900));

        let summary = reconciler.delete_orphans(EntityType::Question, &orphans).await.unwrap();

        assert_eq!(summary.deleted.get(&EntityType::Question), Some(&1));
        assert_eq!(summary.deleted.get(&EntityType::Choice), Some(&1));
        assert_eq!(summary.deleted.get(&EntityType::Answer), Some(&1));
        assert!(store.rows(EntityType::Question).is_empty());
        assert!(store.rows(EntityType::Answer).is_empty());
        assert_eq!(store.rows(EntityType::Sheet).len(), 1);
    }

    #[tokio::test]
    async fn optional_references_to_deleted_rows_are_cleared() {
        let store = Arc::new(MemoryDestinationStore::new());
        store.insert_raw(choice(10, 999));
        // The answer hangs off an existing question but picked the orphaned choice.
        store.insert_raw(question(2, 800, "Kept", Some(1), 0));
        store.insert_raw(answer(20, 50, 2, Some(10)));

        let reconciler = Reconciler::new(store.clone());
        let orphans = reconciler.detect_orphans(EntityType::Choice).await.unwrap();
        let summary = reconciler.delete_orphans(EntityType::Choice, &orphans).await.unwrap();

        assert_eq!(summary.cleared_references, 1);
        assert!(matches!(
            store.find(EntityType::Answer, Uuid::from_u128(20)),
            Some(DestinationRow::Answer(AnswerRow { choice_id: None, .. }))
        ));
    }

    #[tokio::test]
    async fn duplicates_keep_the_oldest_member() {
        let store = Arc::new(MemoryDestinationStore::new());
        store.insert_raw(question(1, 7, "Do you store biocides?", Some(1), 10));
        store.insert_raw(question(2, 7, "  do you STORE biocides? ", Some(2), 5));
        store.insert_raw(question(3, 8, "Do you store biocides?", Some(1), 0));

        let reconciler = Reconciler::new(store.clone());
        let groups = reconciler.detect_duplicates(EntityType::Question).await.unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].members, vec![Uuid::from_u128(2), Uuid::from_u128(1)]);

        let summary = reconciler.delete_duplicates(EntityType::Question, &groups).await.unwrap();
        assert_eq!(summary.total_deleted(), 1);
        assert!(store.find(EntityType::Question, Uuid::from_u128(1)).is_none());
        assert!(store.find(EntityType::Question, Uuid::from_u128(2)).is_some());
    }

    #[tokio::test]
    async fn repair_fixes_nulls_and_repeats() {
        let store = Arc::new(MemoryDestinationStore::new());
        let orders = [Some(1), None, Some(1), Some(4), None];
        for (i, order) in orders.iter().enumerate() {
            store.insert_raw(question(i as u128 + 1, 7, &format!("Q{i}"), *order, i as i64));
        }

        let reconciler = Reconciler::new(store.clone());
        assert!(!reconciler
            .detect_ordering_violations(EntityType::Question)
            .await
            .unwrap()
            .is_empty());

        let summary = reconciler.repair_ordering(EntityType::Question).await.unwrap();
        assert_eq!(summary.groups_repaired, 1);

        let mut assigned: Vec<i32> = store
            .rows(EntityType::Question)
            .iter()
            .filter_map(|row| row.ordering().and_then(|(_, order)| order))
            .collect();
        assigned.sort();
        assert_eq!(assigned, vec![1, 2, 3, 4, 5]);
        assert!(reconciler
            .detect_ordering_violations(EntityType::Question)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn report_counts_defects() {
        let store = Arc::new(MemoryDestinationStore::new());
        store.insert_raw(question(1, 900, "A", None, 0));
        store.insert_raw(question(2, 900, "a", Some(1), 1));

        let report = Reconciler::new(store)
            .report(EntityType::Question, Some(3))
            .await
            .unwrap();

        assert_eq!(report.destination_count, 2);
        assert!(report.count_mismatch());
        assert_eq!(report.orphans, 2);
        assert_eq!(report.duplicate_rows, 1);
        assert_eq!(report.ordering_violations, 1);
    }

    #[tokio::test]
    async fn ordering_checks_reject_unordered_types() {
        let reconciler = Reconciler::new(Arc::new(MemoryDestinationStore::new()));
        assert!(matches!(
            reconciler.repair_ordering(EntityType::Sheet).await,
            Err(ReconcilerError::Unsupported { .. })
        ));
    }
}
