//! This module defines the `BatchedWriter`, which persists transformed rows
//! into the destination store in fixed-size batches.
//!
//! Each batch is one atomic upsert keyed on `source_id`. A batch the store
//! rejects is reported and skipped; the batches before it stay written and
//! the ones after it still run.
use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use migrator_repository::{DestinationStore, DestinationStoreError};
use migrator_shared::types::{DestinationRow, EntityType};
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

pub use crate::errors::LoaderError;
use crate::retry::RetryPolicy;

pub const DEFAULT_BATCH_SIZE: usize = 50;

/// Row counts of one `write` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WriteResult {
    /// Rows inserted or updated in place.
    pub inserted: usize,
    /// Rows dropped before writing because their source id repeated.
    pub skipped: usize,
    /// Rows of batches the store rejected.
    pub failed: usize,
}

/// A batch the store rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchFailure {
    pub entity: EntityType,
    pub source_ids: Vec<String>,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteOutcome {
    pub result: WriteResult,
    /// `(source id, destination id)` of every row written, or that would be
    /// written on a dry run.
    pub written: Vec<(Option<String>, Uuid)>,
    /// Source ids dropped as repeats.
    pub skipped_source_ids: Vec<String>,
    pub failures: Vec<BatchFailure>,
}

pub struct BatchedWriter {
    store: Arc<dyn DestinationStore>,
    retry: RetryPolicy,
    dry_run: bool,
}

impl BatchedWriter {
    pub fn new(store: Arc<dyn DestinationStore>, retry: RetryPolicy, dry_run: bool) -> Self {
        Self { store, retry, dry_run }
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    async fn upsert(&self, entity: EntityType, rows: &[DestinationRow]) -> Result<Vec<(Option<String>, Uuid)>, BatchError> {
        let store = &self.store;
        match self
            .retry
            .run(
                "destination upsert",
                || store.upsert_rows(entity, rows),
                DestinationStoreError::is_transient,
            )
            .await
        {
            Ok(upserted) => Ok(upserted.into_iter().map(|u| (u.source_id, u.id)).collect()),
            Err(failure) if failure.error.is_transient() => Err(BatchError::Unreachable(
                LoaderError::DestinationUnreachable {
                    entity,
                    attempts: failure.attempts,
                    source: failure.error,
                },
            )),
            Err(failure) => Err(BatchError::Rejected(failure.error)),
        }
    }

    /// Writes `rows` of `entity` in batches of `batch_size`.
    ///
    /// # Returns
    ///
    /// * `Ok(WriteOutcome)` - Every batch was attempted; rejected ones are
    ///   listed in `failures`
    /// * `Err(LoaderError)` - The batch size is zero, or the store stayed
    ///   unreachable through every retry
    #[instrument(skip(self, rows), fields(entity = %entity, rows = rows.len(), dry_run = self.dry_run))]
    pub async fn write(
        &self,
        entity: EntityType,
        rows: Vec<DestinationRow>,
        batch_size: usize,
    ) -> Result<WriteOutcome, LoaderError> {
        if batch_size == 0 {
            return Err(LoaderError::InvalidBatchSize);
        }

        let mut outcome = WriteOutcome::default();
        let mut seen = HashSet::new();
        let mut unique = Vec::with_capacity(rows.len());
        for row in rows {
            match row.source_id() {
                Some(source_id) if !seen.insert(source_id.to_string()) => {
                    warn!(source_id, "Repeated source id in one write, dropping the later row");
                    outcome.result.skipped += 1;
                    outcome.skipped_source_ids.push(source_id.to_string());
                }
                _ => unique.push(row),
            }
        }

        for (batch_no, batch) in unique.chunks(batch_size).enumerate() {
            if self.dry_run {
                outcome.result.inserted += batch.len();
                outcome
                    .written
                    .extend(batch.iter().map(|row| (row.source_id().map(str::to_string), row.id())));
                continue;
            }

            match self.upsert(entity, batch).await {
                Ok(written) => {
                    debug!(batch = batch_no, count = written.len(), "Batch written");
                    outcome.result.inserted += written.len();
                    outcome.written.extend(written);
                }
                Err(BatchError::Unreachable(e)) => return Err(e),
                Err(BatchError::Rejected(e)) => {
                    let source_ids: Vec<String> = batch
                        .iter()
                        .filter_map(|row| row.source_id().map(str::to_string))
                        .collect();
                    error!(
                        batch = batch_no,
                        count = batch.len(),
                        first_source_id = source_ids.first().map(String::as_str).unwrap_or_default(),
                        error = %e,
                        "Batch rejected by the destination store"
                    );
                    outcome.result.failed += batch.len();
                    outcome.failures.push(BatchFailure {
                        entity,
                        source_ids,
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            inserted = outcome.result.inserted,
            skipped = outcome.result.skipped,
            failed = outcome.result.failed,
            "Write finished"
        );
        Ok(outcome)
    }

    /// Writes a placeholder standing in for a referenced record that was
    /// never migrated, returning its destination id.
    #[instrument(skip(self), fields(entity = %entity))]
    pub async fn create_placeholder(
        &self,
        entity: EntityType,
        source_id: &str,
        id: Uuid,
    ) -> Result<Uuid, LoaderError> {
        let row = DestinationRow::placeholder(entity, source_id, id, DateTime::<Utc>::UNIX_EPOCH)
            .ok_or(LoaderError::PlaceholderUnsupported(entity))?;
        warn!(source_id, "Creating placeholder row");

        if self.dry_run {
            return Ok(id);
        }
        match self.upsert(entity, std::slice::from_ref(&row)).await {
            Ok(written) => Ok(written.first().map_or(id, |(_, id)| *id)),
            Err(BatchError::Unreachable(e)) => Err(e),
            Err(BatchError::Rejected(e)) => Err(LoaderError::Store(e)),
        }
    }
}

enum BatchError {
    Unreachable(LoaderError),
    Rejected(DestinationStoreError),
}
