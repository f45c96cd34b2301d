//! This module defines the `IdentifierMapper`, the run-scoped table from
//! legacy identifiers to destination ids.
//!
//! A mapper belongs to exactly one migration run and is passed by reference
//! to the stages that need it. It starts from what the destination already
//! holds (its `source_id` columns), so re-running a migration resolves every
//! previously written record to the same row.
use std::collections::HashMap;
use std::future::Future;

use migrator_repository::DestinationStore;
use migrator_shared::types::EntityType;
use tracing::{debug, info};
use uuid::Uuid;

use crate::errors::MapperError;

/// Namespace of the ids minted for legacy records.
const SOURCE_ID_NAMESPACE: Uuid = Uuid::from_u128(0x6f1c_9a52_83d4_4e0b_9b7e_2c41_d5a8_f0e3);

#[derive(Debug, Default, Clone)]
pub struct IdentifierMapper {
    ids: HashMap<(EntityType, String), Uuid>,
    aliases: HashMap<(EntityType, String), String>,
}

impl IdentifierMapper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a mapper from the `source_id` columns of the given entity types.
    pub async fn load_from_store(
        store: &dyn DestinationStore,
        entities: &[EntityType],
    ) -> Result<Self, MapperError> {
        let mut mapper = Self::new();
        for entity in entities {
            let pairs = store.load_source_mappings(*entity).await?;
            let loaded = mapper.preload(*entity, pairs)?;
            debug!(entity = %entity, loaded, "Preloaded identifier mappings");
        }
        info!(mappings = mapper.len(), "Identifier mapper ready");
        Ok(mapper)
    }

    /// The deterministic destination id of a legacy record.
    pub fn mint(&self, entity: EntityType, source_id: &str) -> Uuid {
        Uuid::new_v5(&SOURCE_ID_NAMESPACE, format!("{entity}:{source_id}").as_bytes())
    }

    fn canonical<'a>(&'a self, entity: EntityType, source_id: &'a str) -> &'a str {
        self.aliases
            .get(&(entity, source_id.to_string()))
            .map_or(source_id, String::as_str)
    }

    /// Destination id of `(entity, source_id)`, following aliases.
    pub fn resolve(&self, entity: EntityType, source_id: &str) -> Option<Uuid> {
        let canonical = self.canonical(entity, source_id);
        self.ids.get(&(entity, canonical.to_string())).copied()
    }

    /// Like [`IdentifierMapper::resolve`], but an unknown pair is an error.
    pub fn lookup(&self, entity: EntityType, source_id: &str) -> Result<Uuid, MapperError> {
        self.resolve(entity, source_id).ok_or_else(|| MapperError::Unmapped {
            entity,
            source_id: source_id.to_string(),
        })
    }

    /// Resolves the pair, calling `create` to make the destination row when
    /// there is no mapping yet. The created id is recorded before returning.
    pub async fn resolve_or_create<F, Fut, E>(
        &mut self,
        entity: EntityType,
        source_id: &str,
        create: F,
    ) -> Result<Uuid, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Uuid, E>>,
        E: From<MapperError>,
    {
        if let Some(id) = self.resolve(entity, source_id) {
            return Ok(id);
        }
        let id = create().await?;
        let canonical = self.canonical(entity, source_id).to_string();
        self.record(entity, &canonical, id)?;
        Ok(id)
    }

    /// Binds `(entity, source_id)` to `id`.
    ///
    /// Recording the same binding twice is a no-op; rebinding a pair to a
    /// different id is a `MappingConflict`.
    pub fn record(&mut self, entity: EntityType, source_id: &str, id: Uuid) -> Result<(), MapperError> {
        match self.ids.get(&(entity, source_id.to_string())) {
            Some(existing) if *existing == id => Ok(()),
            Some(existing) => Err(MapperError::MappingConflict {
                entity,
                source_id: source_id.to_string(),
                existing: *existing,
                attempted: id,
            }),
            None => {
                self.ids.insert((entity, source_id.to_string()), id);
                Ok(())
            }
        }
    }

    /// Records every pair, returning how many were given.
    pub fn preload(
        &mut self,
        entity: EntityType,
        pairs: impl IntoIterator<Item = (String, Uuid)>,
    ) -> Result<usize, MapperError> {
        let mut count = 0;
        for (source_id, id) in pairs {
            self.record(entity, &source_id, id)?;
            count += 1;
        }
        Ok(count)
    }

    /// Makes `duplicate` resolve to whatever `canonical` resolves to.
    pub fn alias(&mut self, entity: EntityType, duplicate: &str, canonical: &str) {
        if duplicate != canonical {
            self.aliases
                .insert((entity, duplicate.to_string()), canonical.to_string());
        }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minting_is_stable_and_scoped_by_entity() {
        let mapper = IdentifierMapper::new();
        assert_eq!(
            mapper.mint(EntityType::Question, "q-1"),
            IdentifierMapper::new().mint(EntityType::Question, "q-1")
        );
        assert_ne!(
            mapper.mint(EntityType::Question, "x-1"),
            mapper.mint(EntityType::Choice, "x-1")
        );
    }

    #[test]
    fn rerecording_the_same_pair_is_idempotent() {
        let mut mapper = IdentifierMapper::new();
        let id = Uuid::from_u128(1);
        mapper.record(EntityType::Section, "s-1", id).unwrap();
        mapper.record(EntityType::Section, "s-1", id).unwrap();
        assert_eq!(mapper.len(), 1);

        assert!(matches!(
            mapper.record(EntityType::Section, "s-1", Uuid::from_u128(2)),
            Err(MapperError::MappingConflict { .. })
        ));
        assert_eq!(mapper.resolve(EntityType::Section, "s-1"), Some(id));
    }

    #[test]
    fn aliases_resolve_to_the_canonical_record() {
        let mut mapper = IdentifierMapper::new();
        mapper.record(EntityType::Choice, "c-1", Uuid::from_u128(5)).unwrap();
        mapper.alias(EntityType::Choice, "c-1-copy", "c-1");

        assert_eq!(mapper.resolve(EntityType::Choice, "c-1-copy"), Some(Uuid::from_u128(5)));
        assert!(matches!(
            mapper.lookup(EntityType::Choice, "c-2"),
            Err(MapperError::Unmapped { .. })
        ));
    }

    #[tokio::test]
    async fn fallback_runs_once_and_is_remembered() {
        let mut mapper = IdentifierMapper::new();
        let created = Uuid::from_u128(9);

        let first = mapper
            .resolve_or_create(EntityType::Company, "c-9", || async { Ok::<_, MapperError>(created) })
            .await
            .unwrap();
        let second = mapper
            .resolve_or_create(EntityType::Company, "c-9", || async {
                Err::<Uuid, _>(MapperError::Unmapped {
                    entity: EntityType::Company,
                    source_id: "c-9".to_string(),
                })
            })
            .await
            .unwrap();

        assert_eq!(first, created);
        assert_eq!(second, created);
    }

    #[tokio::test]
    async fn loads_existing_mappings_from_the_store() {
        use migrator_repository::MemoryDestinationStore;
        use migrator_shared::types::{CompanyRow, DestinationRow};

        let store = MemoryDestinationStore::new();
        store.insert_raw(DestinationRow::Company(CompanyRow {
            id: Uuid::from_u128(3),
            source_id: Some("c-3".to_string()),
            name: "Acme".to_string(),
            created_at: chrono::DateTime::<chrono::Utc>::UNIX_EPOCH,
        }));

        let mapper = IdentifierMapper::load_from_store(&store, EntityType::all()).await.unwrap();
        assert_eq!(mapper.resolve(EntityType::Company, "c-3"), Some(Uuid::from_u128(3)));
    }
}
