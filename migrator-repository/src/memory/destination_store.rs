use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use migrator_shared::types::{DestinationRow, EntityType, GroupMember, OrphanRow};
use uuid::Uuid;

use crate::errors::DestinationStoreError;
use crate::interfaces::{CascadeDelete, CascadeDeleted, DestinationStore, UpsertedRow};

/// Destination store kept in process memory.
///
/// Like the production schema, foreign keys are not enforced on write, so
/// fixtures can contain orphans. `users.email` is unique, and writes can be
/// made to fail per source id or wholesale to exercise error handling.
#[derive(Default)]
pub struct MemoryDestinationStore {
    tables: RwLock<BTreeMap<EntityType, Vec<DestinationRow>>>,
    rejected_source_ids: RwLock<HashSet<String>>,
    unavailable: AtomicBool,
    upsert_calls: AtomicUsize,
}

impl MemoryDestinationStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<EntityType, Vec<DestinationRow>>> {
        self.tables.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<EntityType, Vec<DestinationRow>>> {
        self.tables.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_available(&self) -> Result<(), DestinationStoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(DestinationStoreError::unavailable("connection refused"));
        }
        Ok(())
    }

    /// Stores a row as-is, bypassing upsert semantics. For fixtures.
    pub fn insert_raw(&self, row: DestinationRow) {
        self.write().entry(row.entity_type()).or_default().push(row);
    }

    /// Snapshot of an entity's rows in insertion order.
    pub fn rows(&self, entity: EntityType) -> Vec<DestinationRow> {
        self.read().get(&entity).cloned().unwrap_or_default()
    }

    pub fn find(&self, entity: EntityType, id: Uuid) -> Option<DestinationRow> {
        self.read()
            .get(&entity)
            .and_then(|rows| rows.iter().find(|row| row.id() == id).cloned())
    }

    /// Makes every upsert containing `source_id` fail with a write conflict.
    pub fn reject_source_id(&self, source_id: impl Into<String>) {
        self.rejected_source_ids
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(source_id.into());
    }

    /// Simulates losing (or regaining) the connection.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of `upsert_rows` calls made so far, failed ones included.
    pub fn upsert_calls(&self) -> usize {
        self.upsert_calls.load(Ordering::SeqCst)
    }

    fn check_conflicts(
        &self,
        tables: &BTreeMap<EntityType, Vec<DestinationRow>>,
        rows: &[DestinationRow],
    ) -> Result<(), DestinationStoreError> {
        let rejected = self
            .rejected_source_ids
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(source_id) = rows
            .iter()
            .filter_map(DestinationRow::source_id)
            .find(|sid| rejected.contains(*sid))
        {
            return Err(DestinationStoreError::conflict(format!(
                "row {} violates a table constraint",
                source_id
            )));
        }

        let mut emails: HashMap<String, Option<String>> = tables
            .get(&EntityType::User)
            .into_iter()
            .flatten()
            .filter_map(|row| match row {
                DestinationRow::User(user) => {
                    Some((user.email.to_lowercase(), user.source_id.clone()))
                }
                _ => None,
            })
            .collect();
        for row in rows {
            if let DestinationRow::User(user) = row {
                let email = user.email.to_lowercase();
                match emails.get(&email) {
                    Some(owner) if *owner != user.source_id || owner.is_none() => {
                        return Err(DestinationStoreError::conflict(format!(
                            "duplicate key value violates unique constraint \"users_email_key\" ({})",
                            user.email
                        )));
                    }
                    _ => {
                        emails.insert(email, user.source_id.clone());
                    }
                }
            }
        }
        Ok(())
    }
}

type Tables = BTreeMap<EntityType, Vec<DestinationRow>>;

fn is_column_of(entity: EntityType, column: &str) -> bool {
    entity.foreign_keys().iter().any(|fk| fk.column == column)
}

fn check_clearable(entity: EntityType, column: &str) -> Result<(), DestinationStoreError> {
    match entity.foreign_keys().iter().find(|fk| fk.column == column) {
        Some(fk) if !fk.required => Ok(()),
        Some(_) => Err(DestinationStoreError::unsupported(
            entity,
            format!("{column} is required and cannot be cleared"),
        )),
        None => Err(DestinationStoreError::unsupported(entity, format!("no column {column}"))),
    }
}

fn clear_in(tables: &mut Tables, entity: EntityType, column: &str, parent_ids: &[Uuid]) -> u64 {
    let parents: HashSet<&Uuid> = parent_ids.iter().collect();
    let mut cleared = 0;
    if let Some(rows) = tables.get_mut(&entity) {
        for row in rows.iter_mut() {
            if row.foreign_key(column).is_some_and(|id| parents.contains(&id))
                && row.clear_foreign_key(column)
            {
                cleared += 1;
            }
        }
    }
    cleared
}

fn delete_in(tables: &mut Tables, entity: EntityType, ids: &[Uuid]) -> u64 {
    let doomed: HashSet<&Uuid> = ids.iter().collect();
    let Some(rows) = tables.get_mut(&entity) else {
        return 0;
    };
    let before = rows.len();
    rows.retain(|row| !doomed.contains(&row.id()));
    (before - rows.len()) as u64
}

#[async_trait]
impl DestinationStore for MemoryDestinationStore {
    async fn ping(&self) -> Result<(), DestinationStoreError> {
        self.check_available()
    }

    async fn upsert_rows(
        &self,
        entity: EntityType,
        rows: &[DestinationRow],
    ) -> Result<Vec<UpsertedRow>, DestinationStoreError> {
        self.upsert_calls.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;

        if let Some(row) = rows.iter().find(|row| row.entity_type() != entity) {
            return Err(DestinationStoreError::unsupported(
                entity,
                format!("cannot write a {} row into {}", row.entity_type(), entity.table_name()),
            ));
        }

        let mut tables = self.write();
        self.check_conflicts(&tables, rows)?;

        let table = tables.entry(entity).or_default();
        let mut upserted = Vec::with_capacity(rows.len());
        for row in rows {
            let existing = row.source_id().and_then(|sid| {
                table
                    .iter()
                    .position(|stored| stored.source_id() == Some(sid))
            });
            let id = match existing {
                Some(idx) => {
                    let id = table[idx].id();
                    let mut updated = row.clone().with_id(id);
                    // A missing order number keeps the stored one.
                    if let (Some((_, None)), Some((_, stored))) =
                        (updated.ordering(), table[idx].ordering())
                    {
                        updated.set_order_number(stored);
                    }
                    table[idx] = updated;
                    id
                }
                None => {
                    table.push(row.clone());
                    row.id()
                }
            };
            upserted.push(UpsertedRow {
                source_id: row.source_id().map(str::to_string),
                id,
            });
        }
        Ok(upserted)
    }

    async fn load_source_mappings(
        &self,
        entity: EntityType,
    ) -> Result<Vec<(String, Uuid)>, DestinationStoreError> {
        self.check_available()?;
        Ok(self
            .read()
            .get(&entity)
            .into_iter()
            .flatten()
            .filter_map(|row| row.source_id().map(|sid| (sid.to_string(), row.id())))
            .collect())
    }

    async fn count_rows(&self, entity: EntityType) -> Result<u64, DestinationStoreError> {
        self.check_available()?;
        Ok(self.read().get(&entity).map_or(0, |rows| rows.len() as u64))
    }

    async fn find_orphans(&self, entity: EntityType) -> Result<Vec<OrphanRow>, DestinationStoreError> {
        self.check_available()?;
        let tables = self.read();
        let exists = |target: EntityType, id: Uuid| {
            tables
                .get(&target)
                .is_some_and(|rows| rows.iter().any(|row| row.id() == id))
        };

        let mut orphans = Vec::new();
        for row in tables.get(&entity).into_iter().flatten() {
            for fk in row.foreign_keys() {
                if let Some(parent) = fk.id {
                    if !exists(fk.references, parent) {
                        orphans.push(OrphanRow {
                            entity,
                            id: row.id(),
                            source_id: row.source_id().map(str::to_string),
                            column: fk.column,
                            missing_parent: parent,
                        });
                    }
                }
            }
        }
        Ok(orphans)
    }

    async fn group_members(&self, entity: EntityType) -> Result<Vec<GroupMember>, DestinationStoreError> {
        self.check_available()?;
        if !entity.is_ordered() {
            return Err(DestinationStoreError::unsupported(entity, "not an ordered entity"));
        }
        Ok(self
            .read()
            .get(&entity)
            .into_iter()
            .flatten()
            .filter_map(|row| {
                let (parent_id, order_number) = row.ordering()?;
                Some(GroupMember {
                    id: row.id(),
                    parent_id,
                    order_number,
                    content: row.content().map(str::to_string),
                    created_at: row.created_at(),
                })
            })
            .collect())
    }

    async fn find_referencing_ids(
        &self,
        entity: EntityType,
        column: &str,
        parent_ids: &[Uuid],
    ) -> Result<Vec<Uuid>, DestinationStoreError> {
        self.check_available()?;
        if !is_column_of(entity, column) {
            return Err(DestinationStoreError::unsupported(entity, format!("no column {column}")));
        }
        let parents: HashSet<&Uuid> = parent_ids.iter().collect();
        Ok(self
            .read()
            .get(&entity)
            .into_iter()
            .flatten()
            .filter(|row| row.foreign_key(column).is_some_and(|id| parents.contains(&id)))
            .map(DestinationRow::id)
            .collect())
    }

    async fn clear_references(
        &self,
        entity: EntityType,
        column: &str,
        parent_ids: &[Uuid],
    ) -> Result<u64, DestinationStoreError> {
        self.check_available()?;
        check_clearable(entity, column)?;
        Ok(clear_in(&mut self.write(), entity, column, parent_ids))
    }

    async fn delete_rows(&self, entity: EntityType, ids: &[Uuid]) -> Result<u64, DestinationStoreError> {
        self.check_available()?;
        Ok(delete_in(&mut self.write(), entity, ids))
    }

    async fn delete_cascade(&self, plan: &CascadeDelete) -> Result<CascadeDeleted, DestinationStoreError> {
        self.check_available()?;
        for (entity, column, _) in &plan.clear {
            check_clearable(*entity, column)?;
        }

        let mut tables = self.write();
        let mut outcome = CascadeDeleted::default();
        for (entity, column, parent_ids) in &plan.clear {
            outcome.cleared_references += clear_in(&mut tables, *entity, column, parent_ids);
        }
        for (entity, ids) in &plan.delete {
            outcome.deleted.push((*entity, delete_in(&mut tables, *entity, ids)));
        }
        Ok(outcome)
    }

    async fn update_order_numbers(
        &self,
        entity: EntityType,
        updates: &[(Uuid, i32)],
    ) -> Result<(), DestinationStoreError> {
        self.check_available()?;
        if !entity.is_ordered() {
            return Err(DestinationStoreError::unsupported(entity, "not an ordered entity"));
        }
        let positions: HashMap<Uuid, i32> = updates.iter().copied().collect();
        if let Some(rows) = self.write().get_mut(&entity) {
            for row in rows.iter_mut() {
                if let Some(order_number) = positions.get(&row.id()) {
                    row.set_order_number(Some(*order_number));
                }
            }
        }
        Ok(())
    }
}
