//! The event store abstraction.
//!
//! [`EventStore`] is the seam between domain-facing code (the
//! [`repository`](crate::repository)) and a storage backend. Backends
//! serialize appends per stream and keep every read in
//! order-of-occurrence order.

use std::{collections::HashMap, future::Future};

use uuid::Uuid;

use crate::event::Event;

pub mod inmemory;

/// An append-only store of events grouped into per-aggregate streams.
///
/// A stream is keyed by `(aggregate_id, aggregate_name)`; the same
/// aggregate id may own independent streams under different names.
/// Appends bump the stream version by exactly one, and all reads
/// return events ordered by the store-wide order of occurrence.
pub trait EventStore<E: Event>: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Append an event regardless of the current stream version.
    ///
    /// Creates the stream first when the store allows implicit
    /// creation.
    fn save<'a>(
        &'a self,
        event: &'a E,
        aggregate_name: &'a str,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

    /// Append an event only if the stream is at `expected_version`.
    ///
    /// Fails with the backend's conflict error otherwise; never
    /// retried internally.
    fn save_expecting<'a>(
        &'a self,
        event: &'a E,
        aggregate_name: &'a str,
        expected_version: i64,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

    /// Create an empty stream at version 0 if none exists yet.
    ///
    /// Idempotent; an existing stream is left untouched.
    fn ensure_stream_exists<'a>(
        &'a self,
        aggregate_id: Uuid,
        aggregate_name: &'a str,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

    /// The current version of a stream, or `None` if it was never
    /// created.
    fn stream_version<'a>(
        &'a self,
        aggregate_id: Uuid,
        aggregate_name: &'a str,
    ) -> impl Future<Output = Result<Option<i64>, Self::Error>> + Send + 'a;

    /// Whether this exact event is already stored in the stream.
    fn contains<'a>(
        &'a self,
        event: &'a E,
        aggregate_name: &'a str,
    ) -> impl Future<Output = Result<bool, Self::Error>> + Send + 'a
    where
        E: PartialEq;

    /// All events of one stream, oldest first.
    fn find_all<'a>(
        &'a self,
        aggregate_id: Uuid,
        aggregate_name: &'a str,
    ) -> impl Future<Output = Result<Vec<E>, Self::Error>> + Send + 'a;

    /// All events for an aggregate id across every stream name, oldest
    /// first.
    fn find_all_by_aggregate_id<'a>(
        &'a self,
        aggregate_id: Uuid,
    ) -> impl Future<Output = Result<Vec<E>, Self::Error>> + Send + 'a;

    /// Every non-empty stream under `aggregate_name`, keyed by
    /// aggregate id, each oldest first.
    fn find_all_grouped<'a>(
        &'a self,
        aggregate_name: &'a str,
    ) -> impl Future<Output = Result<HashMap<Uuid, Vec<E>>, Self::Error>> + Send + 'a;

    /// The prefix of a stream up to and including `to_event`.
    ///
    /// Returns an empty list when the event id is not present in the
    /// stream.
    fn find_all_to_event<'a>(
        &'a self,
        to_event: &'a E,
        aggregate_name: &'a str,
    ) -> impl Future<Output = Result<Vec<E>, Self::Error>> + Send + 'a;
}
