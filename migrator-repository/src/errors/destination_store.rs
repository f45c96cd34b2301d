use thiserror::Error;

/// Represents errors that can occur within the destination store.
///
/// SQLx errors are classified on conversion so callers can tell a lost
/// connection (retry, then give up on the run) from a rejected write (report
/// the batch and carry on).
#[derive(Debug, Clone, Error)]
pub enum DestinationStoreError {
    #[error("Destination store unavailable: {0}")]
    Unavailable(String),

    /// A constraint not covered by the upsert key rejected the write.
    #[error("Write conflict: {0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Unsupported operation for {entity}: {reason}")]
    Unsupported { entity: String, reason: String },
}

impl DestinationStoreError {
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    pub fn unsupported(entity: impl ToString, reason: impl Into<String>) -> Self {
        Self::Unsupported {
            entity: entity.to_string(),
            reason: reason.into(),
        }
    }

    /// Whether retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

impl From<sqlx::Error> for DestinationStoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => Self::Unavailable(err.to_string()),
            sqlx::Error::Database(db) => {
                if db.is_unique_violation()
                    || db.is_foreign_key_violation()
                    || db.is_check_violation()
                {
                    Self::Conflict(db.to_string())
                } else {
                    Self::Database(db.to_string())
                }
            }
            _ => Self::Database(err.to_string()),
        }
    }
}
