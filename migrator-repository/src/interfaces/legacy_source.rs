use async_trait::async_trait;
use migrator_shared::types::{EntityType, LegacyPage};

use crate::errors::LegacySourceError;

/// Read access to the legacy application's paginated Data API.
///
/// Implementations perform exactly one request per call; retrying is the
/// caller's concern.
#[async_trait]
pub trait LegacySource: Send + Sync {
    /// Fetches up to `limit` records of `entity` starting at offset `cursor`.
    ///
    /// The returned page carries the number of records remaining after it;
    /// `remaining == 0` means the listing is exhausted.
    async fn fetch_page(
        &self,
        entity: EntityType,
        cursor: u64,
        limit: u32,
    ) -> Result<LegacyPage, LegacySourceError>;

    /// Total number of records the API holds for `entity`.
    async fn total_count(&self, entity: EntityType) -> Result<u64, LegacySourceError> {
        let page = self.fetch_page(entity, 0, 1).await?;
        Ok(page.returned() as u64 + page.remaining)
    }
}
