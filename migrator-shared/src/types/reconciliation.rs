//! Value types produced by the reconciliation checks.
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::EntityType;

/// A row whose foreign key points at a row that does not exist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrphanRow {
    pub entity: EntityType,
    pub id: Uuid,
    pub source_id: Option<String>,
    pub column: &'static str,
    pub missing_parent: Uuid,
}

/// One member of an ordering group as stored in the destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupMember {
    pub id: Uuid,
    pub parent_id: Option<Uuid>,
    pub order_number: Option<i32>,
    pub content: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Siblings whose content is the same once case and whitespace are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateGroup {
    pub entity: EntityType,
    pub parent_id: Option<Uuid>,
    pub normalized_content: String,
    /// Member ids, oldest first.
    pub members: Vec<Uuid>,
}

impl DuplicateGroup {
    /// Members beyond the oldest one.
    pub fn redundant(&self) -> &[Uuid] {
        self.members.get(1..).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderingViolationKind {
    NullOrder,
    Gap,
    Duplicate,
}

/// A defect in one ordering group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderingViolation {
    pub entity: EntityType,
    pub parent_id: Option<Uuid>,
    pub kind: OrderingViolationKind,
    pub members: Vec<Uuid>,
}

/// Reconciliation findings for one entity type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntityReport {
    pub entity: EntityType,
    pub source_count: Option<u64>,
    pub destination_count: u64,
    pub orphans: usize,
    pub duplicate_rows: usize,
    pub ordering_violations: usize,
}

impl EntityReport {
    pub fn count_mismatch(&self) -> bool {
        self.source_count
            .is_some_and(|source| source != self.destination_count)
    }

    pub fn is_clean(&self) -> bool {
        self.orphans == 0 && self.duplicate_rows == 0 && self.ordering_violations == 0
    }
}

/// Findings across entity types, produced fresh on each run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconciliationReport {
    pub entities: Vec<EntityReport>,
}

impl ReconciliationReport {
    pub fn total_orphans(&self) -> usize {
        self.entities.iter().map(|e| e.orphans).sum()
    }

    pub fn total_duplicate_rows(&self) -> usize {
        self.entities.iter().map(|e| e.duplicate_rows).sum()
    }

    pub fn total_ordering_violations(&self) -> usize {
        self.entities.iter().map(|e| e.ordering_violations).sum()
    }

    pub fn is_clean(&self) -> bool {
        self.entities.iter().all(EntityReport::is_clean)
    }
}

/// Normalises content for duplicate comparison: lowercase, whitespace runs
/// collapsed to one space, trimmed.
pub fn normalize_content(content: &str) -> String {
    content
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
