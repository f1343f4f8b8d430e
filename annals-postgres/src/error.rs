use annals_core::{
    concurrency::{OptimisticLockingConflict, StreamNotFound},
    versioning::VersioningError,
};
use uuid::Uuid;

/// Error type for `PostgreSQL` event store operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Query execution or transaction failure.
    #[error("event store query failed for {context}")]
    Storage {
        context: String,
        #[source]
        source: sqlx::Error,
    },
    /// A conditional append observed a different stream version.
    #[error(transparent)]
    Conflict(#[from] OptimisticLockingConflict),
    /// The target stream does not exist and implicit creation is off.
    #[error(transparent)]
    StreamNotFound(#[from] StreamNotFound),
    /// Translating an event to or from its stored form failed.
    #[error(transparent)]
    Versioning(#[from] VersioningError),
    /// An unconditional append kept losing the version race.
    #[error(
        "gave up appending event {event_id} for aggregate {aggregate_id} in stream \
         {aggregate_name} after {attempts} attempts"
    )]
    SaveRetriesExhausted {
        event_id: Uuid,
        aggregate_id: Uuid,
        aggregate_name: String,
        attempts: u32,
    },
    /// A stored event version does not fit the in-memory representation.
    #[error("invalid event version value from database: {0}")]
    InvalidEventVersion(i32),
}

impl Error {
    pub(crate) fn storage(context: impl Into<String>, source: sqlx::Error) -> Self {
        Self::Storage {
            context: context.into(),
            source,
        }
    }
}
