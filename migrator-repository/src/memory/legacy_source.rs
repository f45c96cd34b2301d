use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError, RwLock};

use async_trait::async_trait;
use migrator_shared::types::{EntityType, LegacyPage, LegacyRecord};

use crate::errors::LegacySourceError;
use crate::interfaces::LegacySource;

/// Legacy source serving pre-registered records.
///
/// Records are listed in registration order. Injected failures are returned,
/// one per call, before any page is served. `None` entries stand for results
/// the API returns without an id.
#[derive(Default)]
pub struct MemoryLegacySource {
    records: RwLock<HashMap<EntityType, Vec<Option<LegacyRecord>>>>,
    failures: Mutex<VecDeque<LegacySourceError>>,
    calls: AtomicUsize,
}

impl MemoryLegacySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: impl IntoIterator<Item = LegacyRecord>) -> Self {
        let source = Self::new();
        for record in records {
            source.push(record);
        }
        source
    }

    pub fn push(&self, record: LegacyRecord) {
        self.records
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(record.entity_type)
            .or_default()
            .push(Some(record));
    }

    /// Lists a result without an id at the current end of `entity`'s listing.
    pub fn push_unidentified(&self, entity: EntityType) {
        self.records
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(entity)
            .or_default()
            .push(None);
    }

    /// Makes the next call fail with `error`.
    pub fn fail_next(&self, error: LegacySourceError) {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(error);
    }

    /// Number of `fetch_page` calls made so far, failed ones included.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LegacySource for MemoryLegacySource {
    async fn fetch_page(
        &self,
        entity: EntityType,
        cursor: u64,
        limit: u32,
    ) -> Result<LegacyPage, LegacySourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(error) = self
            .failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
        {
            return Err(error);
        }

        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        let all = records.get(&entity).map(Vec::as_slice).unwrap_or_default();
        let start = usize::try_from(cursor).unwrap_or(usize::MAX).min(all.len());
        let end = start.saturating_add(limit as usize).min(all.len());

        let mut page = LegacyPage {
            remaining: (all.len() - end) as u64,
            ..LegacyPage::default()
        };
        for (offset, entry) in all[start..end].iter().enumerate() {
            match entry {
                Some(record) => page.records.push(record.clone()),
                None => page.unidentified.push(offset as u64),
            }
        }
        Ok(page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    #[tokio::test]
    async fn pages_through_registered_records() {
        let source = MemoryLegacySource::with_records(
            (0..5).map(|i| LegacyRecord::new(EntityType::Company, format!("c-{i}"), Map::new())),
        );

        let first = source.fetch_page(EntityType::Company, 0, 2).await.unwrap();
        assert_eq!(first.records.len(), 2);
        assert_eq!(first.remaining, 3);

        let last = source.fetch_page(EntityType::Company, 4, 2).await.unwrap();
        assert_eq!(last.records[0].source_id, "c-4");
        assert_eq!(last.remaining, 0);

        assert_eq!(source.total_count(EntityType::Company).await.unwrap(), 5);
        assert_eq!(source.total_count(EntityType::User).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn injected_failures_come_first() {
        let source = MemoryLegacySource::new();
        source.fail_next(LegacySourceError::transient("reset by peer"));

        assert!(source.fetch_page(EntityType::User, 0, 10).await.is_err());
        assert!(source.fetch_page(EntityType::User, 0, 10).await.is_ok());
        assert_eq!(source.calls(), 2);
    }
}
