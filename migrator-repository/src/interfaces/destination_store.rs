//! This module defines the `DestinationStore` trait, the migrator's only view
//! of the destination database. Operations are expressed per entity type so
//! the pipeline and the reconciliation checks stay table-agnostic.
use async_trait::async_trait;
use migrator_shared::types::{DestinationRow, EntityType, GroupMember, OrphanRow};
use uuid::Uuid;

use crate::errors::DestinationStoreError;

/// A row as persisted by an upsert: the destination id now bound to the
/// row's source id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpsertedRow {
    pub source_id: Option<String>,
    pub id: Uuid,
}

/// Reference clears and row deletions that land together or not at all.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CascadeDelete {
    /// `(entity, column, parent ids)` optional references to null, applied
    /// before any delete.
    pub clear: Vec<(EntityType, &'static str, Vec<Uuid>)>,
    /// `(entity, ids)`, deleted in the order given.
    pub delete: Vec<(EntityType, Vec<Uuid>)>,
}

/// Rows touched by a [`CascadeDelete`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CascadeDeleted {
    pub cleared_references: u64,
    pub deleted: Vec<(EntityType, u64)>,
}

/// A trait that defines the interface for reading and writing the
/// destination tables.
///
/// Implementors must make `upsert_rows` idempotent on `source_id`: writing a
/// row whose source id already exists updates that row in place and keeps
/// its existing id.
#[async_trait]
pub trait DestinationStore: Send + Sync {
    /// Checks that the store is reachable.
    async fn ping(&self) -> Result<(), DestinationStoreError>;

    /// Inserts or updates `rows`, all of type `entity`, in one atomic write.
    ///
    /// # Returns
    ///
    /// * `Ok(Vec<UpsertedRow>)` - The persisted id of every row, which differs
    ///   from the row's own id when the source id was already present
    /// * `Err(DestinationStoreError)` - Nothing from this call was written
    async fn upsert_rows(
        &self,
        entity: EntityType,
        rows: &[DestinationRow],
    ) -> Result<Vec<UpsertedRow>, DestinationStoreError>;

    /// Every `(source_id, id)` pair of `entity` with a legacy origin.
    async fn load_source_mappings(
        &self,
        entity: EntityType,
    ) -> Result<Vec<(String, Uuid)>, DestinationStoreError>;

    /// Exact row count of the entity's table.
    async fn count_rows(&self, entity: EntityType) -> Result<u64, DestinationStoreError>;

    /// Rows of `entity` with a non-null foreign key that resolves to nothing.
    async fn find_orphans(&self, entity: EntityType) -> Result<Vec<OrphanRow>, DestinationStoreError>;

    /// Every row of an ordered entity type, as ordering group members.
    async fn group_members(&self, entity: EntityType) -> Result<Vec<GroupMember>, DestinationStoreError>;

    /// Ids of `entity` rows whose `column` holds one of `parent_ids`.
    async fn find_referencing_ids(
        &self,
        entity: EntityType,
        column: &str,
        parent_ids: &[Uuid],
    ) -> Result<Vec<Uuid>, DestinationStoreError>;

    /// Sets `column` to null on `entity` rows referencing one of `parent_ids`.
    async fn clear_references(
        &self,
        entity: EntityType,
        column: &str,
        parent_ids: &[Uuid],
    ) -> Result<u64, DestinationStoreError>;

    /// Deletes the given rows of `entity`.
    async fn delete_rows(&self, entity: EntityType, ids: &[Uuid]) -> Result<u64, DestinationStoreError>;

    /// Applies every clear, then every delete of `plan` in one transaction.
    ///
    /// # Returns
    ///
    /// * `Ok(CascadeDeleted)` - Counts of what was cleared and deleted
    /// * `Err(DestinationStoreError)` - Nothing from `plan` was applied
    async fn delete_cascade(&self, plan: &CascadeDelete) -> Result<CascadeDeleted, DestinationStoreError>;

    /// Persists new order numbers for rows of an ordered entity type.
    async fn update_order_numbers(
        &self,
        entity: EntityType,
        updates: &[(Uuid, i32)],
    ) -> Result<(), DestinationStoreError>;
}
