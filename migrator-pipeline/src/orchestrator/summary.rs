use std::fmt;

use migrator_shared::types::EntityType;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    Excluded,
    Duplicate,
    MissingReference,
    Validation,
    RepeatedSourceId,
    WriteFailed,
}

/// A legacy record that did not make it into the destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordIssue {
    pub entity: EntityType,
    pub source_id: String,
    pub kind: IssueKind,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntitySummary {
    pub entity: EntityType,
    pub fetched: usize,
    pub pages: usize,
    pub migrated: usize,
    pub skipped: usize,
    pub failed: usize,
    pub issues: Vec<RecordIssue>,
}

impl EntitySummary {
    pub fn new(entity: EntityType) -> Self {
        Self {
            entity,
            fetched: 0,
            pages: 0,
            migrated: 0,
            skipped: 0,
            failed: 0,
            issues: Vec::new(),
        }
    }

    pub fn count(&self, kind: IssueKind) -> usize {
        self.issues.iter().filter(|issue| issue.kind == kind).count()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationSummary {
    pub dry_run: bool,
    pub entities: Vec<EntitySummary>,
}

impl MigrationSummary {
    pub fn migrated(&self) -> usize {
        self.entities.iter().map(|e| e.migrated).sum()
    }

    pub fn skipped(&self) -> usize {
        self.entities.iter().map(|e| e.skipped).sum()
    }

    pub fn failed(&self) -> usize {
        self.entities.iter().map(|e| e.failed).sum()
    }

    /// True when at least one batch was rejected by the destination.
    pub fn has_failures(&self) -> bool {
        self.failed() > 0
    }

    pub fn entity(&self, entity: EntityType) -> Option<&EntitySummary> {
        self.entities.iter().find(|e| e.entity == entity)
    }

    pub fn issues(&self) -> impl Iterator<Item = &RecordIssue> {
        self.entities.iter().flat_map(|e| e.issues.iter())
    }
}

impl fmt::Display for MigrationSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.dry_run {
            writeln!(f, "dry run, nothing was written")?;
        }
        writeln!(
            f,
            "{:<14} {:>8} {:>6} {:>8} {:>8} {:>6}",
            "entity", "fetched", "pages", "migrated", "skipped", "failed"
        )?;
        for e in &self.entities {
            writeln!(
                f,
                "{:<14} {:>8} {:>6} {:>8} {:>8} {:>6}",
                e.entity.to_string(),
                e.fetched,
                e.pages,
                e.migrated,
                e.skipped,
                e.failed
            )?;
        }
        write!(
            f,
            "total: migrated {}, skipped {}, failed {}",
            self.migrated(),
            self.skipped(),
            self.failed()
        )
    }
}
