//! This module defines the `LegacyPager`, which walks one entity type's
//! listing in the legacy Data API from the first record to the last.
//!
//! The cursor only moves forward by the number of results actually returned,
//! so a run sees every record exactly once as long as the listing does not
//! change underneath it. Results without an id still count towards the
//! cursor; they are handed back as listing positions.
use std::sync::Arc;

use async_stream::try_stream;
use migrator_repository::{LegacySource, LegacySourceError};
use migrator_shared::types::{EntityType, LegacyPage};
use tokio_stream::Stream;
use tracing::{debug, instrument};

use crate::errors::ConsumerError;
use crate::retry::RetryPolicy;

/// Counters of one pager.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PagerStats {
    /// Pages successfully fetched.
    pub pages: usize,
    pub records: usize,
    /// Results that carried no id.
    pub unidentified: usize,
}

pub struct LegacyPager {
    source: Arc<dyn LegacySource>,
    entity: EntityType,
    page_size: u32,
    retry: RetryPolicy,
    cursor: u64,
    exhausted: bool,
    stats: PagerStats,
}

impl LegacyPager {
    pub fn new(
        source: Arc<dyn LegacySource>,
        entity: EntityType,
        page_size: u32,
        retry: RetryPolicy,
    ) -> Result<Self, ConsumerError> {
        if page_size == 0 {
            return Err(ConsumerError::InvalidPageSize);
        }
        Ok(Self {
            source,
            entity,
            page_size,
            retry,
            cursor: 0,
            exhausted: false,
            stats: PagerStats::default(),
        })
    }

    pub fn entity(&self) -> EntityType {
        self.entity
    }

    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    pub fn stats(&self) -> PagerStats {
        self.stats
    }

    /// Fetches the next page.
    ///
    /// # Returns
    ///
    /// * `Ok(Some(page))` - The next page, possibly empty for an empty listing.
    ///   `page.unidentified` holds listing positions, not page offsets
    /// * `Ok(None)` - The listing is exhausted
    /// * `Err(ConsumerError)` - Retries were exhausted, the API refused the
    ///   request, or the cursor stopped advancing
    #[instrument(skip(self), fields(entity = %self.entity, cursor = self.cursor))]
    pub async fn next_page(&mut self) -> Result<Option<LegacyPage>, ConsumerError> {
        if self.exhausted {
            return Ok(None);
        }

        let (source, entity, cursor, limit) = (&self.source, self.entity, self.cursor, self.page_size);
        let fetched = self
            .retry
            .run(
                "legacy page",
                || source.fetch_page(entity, cursor, limit),
                LegacySourceError::is_transient,
            )
            .await;

        let mut page = match fetched {
            Ok(page) => page,
            Err(failure) => {
                return Err(ConsumerError::Source {
                    entity,
                    cursor,
                    attempts: failure.attempts,
                    source: failure.error,
                });
            }
        };

        if page.returned() == 0 && page.remaining > 0 {
            return Err(ConsumerError::StalledCursor {
                entity,
                cursor,
                remaining: page.remaining,
            });
        }

        for offset in &mut page.unidentified {
            *offset += cursor;
        }
        self.cursor += page.returned() as u64;
        self.exhausted = page.remaining == 0;
        self.stats.pages += 1;
        self.stats.records += page.records.len();
        self.stats.unidentified += page.unidentified.len();

        debug!(
            returned = page.returned(),
            remaining = page.remaining,
            next_cursor = self.cursor,
            "Fetched page"
        );
        Ok(Some(page))
    }

    /// Turns the pager into a stream of pages.
    pub fn into_stream(mut self) -> impl Stream<Item = Result<LegacyPage, ConsumerError>> + Send {
        try_stream! {
            while let Some(page) = self.next_page().await? {
                yield page;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use migrator_repository::MemoryLegacySource;
    use migrator_shared::types::LegacyRecord;
    use serde_json::Map;
    use tokio_stream::StreamExt;

    fn source_with(count: usize) -> Arc<MemoryLegacySource> {
        Arc::new(MemoryLegacySource::with_records((0..count).map(|i| {
            LegacyRecord::new(EntityType::Section, format!("s-{i}"), Map::new())
        })))
    }

    #[tokio::test]
    async fn pages_until_nothing_remains() {
        let source = source_with(7);
        let mut pager = LegacyPager::new(source.clone(), EntityType::Section, 3, RetryPolicy::no_retry()).unwrap();

        let mut seen = Vec::new();
        while let Some(page) = pager.next_page().await.unwrap() {
            seen.extend(page.records.into_iter().map(|r| r.source_id));
        }

        assert_eq!(seen.len(), 7);
        assert_eq!(seen[6], "s-6");
        assert_eq!(source.calls(), 3);
        assert_eq!(pager.stats().pages, 3);
        assert!(pager.next_page().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn empty_listing_takes_one_call() {
        let source = source_with(0);
        let pages: Vec<LegacyPage> = LegacyPager::new(source.clone(), EntityType::Section, 10, RetryPolicy::no_retry())
            .unwrap()
            .into_stream()
            .collect::<Result<_, _>>()
            .await
            .unwrap();

        assert_eq!(pages, vec![LegacyPage::default()]);
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_retry_the_same_cursor() {
        let source = source_with(2);
        source.fail_next(LegacySourceError::transient("connection reset"));
        let mut pager = LegacyPager::new(source.clone(), EntityType::Section, 5, RetryPolicy::default()).unwrap();

        let page = pager.next_page().await.unwrap().unwrap();
        assert_eq!(page.records.len(), 2);
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test]
    async fn unauthorized_is_fatal_without_retry() {
        let source = source_with(2);
        source.fail_next(LegacySourceError::Unauthorized(401));
        let mut pager = LegacyPager::new(source.clone(), EntityType::Section, 5, RetryPolicy::default()).unwrap();

        let err = pager.next_page().await.unwrap_err();
        assert!(matches!(err, ConsumerError::Source { attempts: 1, .. }));
    }

    struct StuckSource;

    #[async_trait::async_trait]
    impl LegacySource for StuckSource {
        async fn fetch_page(&self, _: EntityType, _: u64, _: u32) -> Result<LegacyPage, LegacySourceError> {
            Ok(LegacyPage {
                remaining: 4,
                ..LegacyPage::default()
            })
        }
    }

    #[tokio::test]
    async fn empty_page_with_records_remaining_is_a_stall() {
        let mut pager = LegacyPager::new(Arc::new(StuckSource), EntityType::Choice, 5, RetryPolicy::no_retry()).unwrap();
        assert!(matches!(
            pager.next_page().await,
            Err(ConsumerError::StalledCursor { remaining: 4, .. })
        ));
    }

    #[tokio::test]
    async fn results_without_id_advance_the_cursor() {
        let source = source_with(2);
        source.push_unidentified(EntityType::Section);
        source.push(LegacyRecord::new(EntityType::Section, "s-2", Map::new()));
        let mut pager = LegacyPager::new(source.clone(), EntityType::Section, 3, RetryPolicy::no_retry()).unwrap();

        let first = pager.next_page().await.unwrap().unwrap();
        assert_eq!(first.records.len(), 2);
        assert_eq!(first.unidentified, vec![2]);
        assert_eq!(pager.cursor(), 3);

        let second = pager.next_page().await.unwrap().unwrap();
        assert_eq!(second.records[0].source_id, "s-2");
        assert!(pager.next_page().await.unwrap().is_none());
        assert_eq!(pager.stats().unidentified, 1);
        assert_eq!(source.calls(), 2);
    }

    #[test]
    fn zero_page_size_is_rejected() {
        assert!(matches!(
            LegacyPager::new(source_with(1), EntityType::Section, 0, RetryPolicy::no_retry()),
            Err(ConsumerError::InvalidPageSize)
        ));
    }
}
