//! Optimistic-concurrency failure types shared by every store backend.

use thiserror::Error;
use uuid::Uuid;

/// A conditional append observed a stream version other than the one
/// the caller expected.
///
/// The caller should reload the aggregate, re-validate its command
/// against the fresh state and retry if still applicable.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error(
    "optimistic locking failed for aggregate {aggregate_id} in stream {aggregate_name}: \
     expected version {expected}, found {actual}"
)]
pub struct OptimisticLockingConflict {
    pub aggregate_id: Uuid,
    pub aggregate_name: String,
    /// The version the caller expected the stream to be at.
    pub expected: i64,
    /// The version the store actually held.
    pub actual: i64,
}

/// An append targeted a `(aggregate_id, aggregate_name)` pair with no
/// stream, and the store was configured not to create one implicitly.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("no stream exists for aggregate {aggregate_id} in stream {aggregate_name}")]
pub struct StreamNotFound {
    pub aggregate_id: Uuid,
    pub aggregate_name: String,
}
