//! In-memory event store implementation for testing.
//!
//! This module provides [`Store`], a thread-safe in-memory
//! implementation of [`EventStore`](super::EventStore) suitable for
//! unit tests and examples. Events are held in their stored form
//! (JSON body plus name and version) so the configured versioning
//! strategy is exercised on every read and write, exactly as a
//! durable backend would.

use std::{
    collections::HashMap,
    future::Future,
    marker::PhantomData,
    sync::{Arc, RwLock},
};

use uuid::Uuid;

use crate::{
    concurrency::{OptimisticLockingConflict, StreamNotFound},
    event::Event,
    store::EventStore,
    versioning::{VersioningError, VersioningStrategy},
};

#[derive(Clone, PartialEq, Eq, Hash)]
struct StreamKey {
    aggregate_id: Uuid,
    aggregate_name: String,
}

/// One appended event in its stored form.
struct StoredRow {
    event_id: Uuid,
    payload: serde_json::Value,
    event_name: String,
    event_version: u16,
    order_of_occurrence: i64,
}

struct Stream {
    #[allow(dead_code)]
    stream_id: Uuid,
    version: i64,
    rows: Vec<StoredRow>,
}

impl Stream {
    fn empty() -> Self {
        Self {
            stream_id: Uuid::new_v4(),
            version: 0,
            rows: Vec::new(),
        }
    }
}

struct Inner {
    streams: HashMap<StreamKey, Stream>,
    next_order: i64,
}

/// In-memory event store that keeps streams in a hash map.
///
/// Appends are serialized by an exclusive write lock, so the version
/// check and the insert are a single atomic step. A store-wide counter
/// assigns the order of occurrence across all streams.
///
/// Cloning is cheap and clones share the same underlying streams.
pub struct Store<E, V> {
    inner: Arc<RwLock<Inner>>,
    versioning: Arc<V>,
    require_existing_streams: bool,
    _marker: PhantomData<fn() -> E>,
}

impl<E, V> Clone for Store<E, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            versioning: Arc::clone(&self.versioning),
            require_existing_streams: self.require_existing_streams,
            _marker: PhantomData,
        }
    }
}

impl<E, V> Store<E, V> {
    #[must_use]
    pub fn new(versioning: V) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner {
                streams: HashMap::new(),
                next_order: 0,
            })),
            versioning: Arc::new(versioning),
            require_existing_streams: false,
            _marker: PhantomData,
        }
    }

    /// Reject appends to streams that were never created.
    ///
    /// By default a missing stream is created on first append; with
    /// this set, appends fail with [`StreamNotFound`] until
    /// [`ensure_stream_exists`](EventStore::ensure_stream_exists) has
    /// been called for the pair.
    #[must_use]
    pub fn require_existing_streams(mut self) -> Self {
        self.require_existing_streams = true;
        self
    }
}

/// Error type for the in-memory store.
#[derive(Debug, thiserror::Error)]
pub enum InMemoryError {
    #[error(transparent)]
    Conflict(#[from] OptimisticLockingConflict),
    #[error(transparent)]
    StreamNotFound(#[from] StreamNotFound),
    #[error(transparent)]
    Versioning(#[from] VersioningError),
}

impl<E, V> Store<E, V>
where
    E: Event,
    V: VersioningStrategy<E>,
{
    /// Encode outside the lock; appends only take the write lock for
    /// the version check and insert.
    fn stage(&self, event: &E) -> Result<StagedRow, InMemoryError> {
        let mapping = self.versioning.name_and_version(event)?;
        let payload = self.versioning.to_body(event)?;
        Ok(StagedRow {
            event_id: event.event_id(),
            payload,
            event_name: mapping.name,
            event_version: mapping.version,
        })
    }

    fn decode_rows(&self, rows: &[StoredRow]) -> Result<Vec<E>, InMemoryError> {
        rows.iter()
            .map(|row| {
                Ok(self
                    .versioning
                    .to_event(&row.payload, &row.event_name, row.event_version)?)
            })
            .collect()
    }

    fn append(
        &self,
        event: &E,
        aggregate_name: &str,
        expected_version: Option<i64>,
    ) -> Result<(), InMemoryError> {
        let staged = self.stage(event)?;
        let key = StreamKey {
            aggregate_id: event.aggregate_id(),
            aggregate_name: aggregate_name.to_owned(),
        };

        let mut inner = self.inner.write().expect("in-memory store lock poisoned");
        if !inner.streams.contains_key(&key) {
            if self.require_existing_streams || expected_version.is_some() {
                return Err(StreamNotFound {
                    aggregate_id: key.aggregate_id,
                    aggregate_name: key.aggregate_name,
                }
                .into());
            }
            inner.streams.insert(key.clone(), Stream::empty());
        }

        let order = inner.next_order;
        let stream = inner
            .streams
            .get_mut(&key)
            .ok_or_else(|| StreamNotFound {
                aggregate_id: key.aggregate_id,
                aggregate_name: key.aggregate_name.clone(),
            })?;

        if let Some(expected) = expected_version {
            if stream.version != expected {
                tracing::debug!(
                    expected,
                    actual = stream.version,
                    "version mismatch, rejecting append"
                );
                return Err(OptimisticLockingConflict {
                    aggregate_id: key.aggregate_id,
                    aggregate_name: key.aggregate_name,
                    expected,
                    actual: stream.version,
                }
                .into());
            }
        }

        stream.version += 1;
        stream.rows.push(StoredRow {
            event_id: staged.event_id,
            payload: staged.payload,
            event_name: staged.event_name,
            event_version: staged.event_version,
            order_of_occurrence: order,
        });
        let version = stream.version;
        inner.next_order = order + 1;
        drop(inner);
        tracing::debug!(version, "event appended to stream");
        Ok(())
    }
}

struct StagedRow {
    event_id: Uuid,
    payload: serde_json::Value,
    event_name: String,
    event_version: u16,
}

impl<E, V> EventStore<E> for Store<E, V>
where
    E: Event,
    V: VersioningStrategy<E> + 'static,
{
    type Error = InMemoryError;

    #[tracing::instrument(skip(self, event), fields(aggregate_id = %event.aggregate_id()))]
    fn save<'a>(
        &'a self,
        event: &'a E,
        aggregate_name: &'a str,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a {
        std::future::ready(self.append(event, aggregate_name, None))
    }

    #[tracing::instrument(skip(self, event), fields(aggregate_id = %event.aggregate_id()))]
    fn save_expecting<'a>(
        &'a self,
        event: &'a E,
        aggregate_name: &'a str,
        expected_version: i64,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a {
        std::future::ready(self.append(event, aggregate_name, Some(expected_version)))
    }

    #[tracing::instrument(skip(self))]
    fn ensure_stream_exists<'a>(
        &'a self,
        aggregate_id: Uuid,
        aggregate_name: &'a str,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a {
        let key = StreamKey {
            aggregate_id,
            aggregate_name: aggregate_name.to_owned(),
        };
        let mut inner = self.inner.write().expect("in-memory store lock poisoned");
        inner.streams.entry(key).or_insert_with(Stream::empty);
        drop(inner);
        std::future::ready(Ok(()))
    }

    #[tracing::instrument(skip(self))]
    fn stream_version<'a>(
        &'a self,
        aggregate_id: Uuid,
        aggregate_name: &'a str,
    ) -> impl Future<Output = Result<Option<i64>, Self::Error>> + Send + 'a {
        let key = StreamKey {
            aggregate_id,
            aggregate_name: aggregate_name.to_owned(),
        };
        let version = {
            let inner = self.inner.read().expect("in-memory store lock poisoned");
            inner.streams.get(&key).map(|s| s.version)
        };
        tracing::trace!(?version, "retrieved stream version");
        std::future::ready(Ok(version))
    }

    #[tracing::instrument(skip(self, event), fields(event_id = %event.event_id()))]
    fn contains<'a>(
        &'a self,
        event: &'a E,
        aggregate_name: &'a str,
    ) -> impl Future<Output = Result<bool, Self::Error>> + Send + 'a
    where
        E: PartialEq,
    {
        let result = (|| {
            let key = StreamKey {
                aggregate_id: event.aggregate_id(),
                aggregate_name: aggregate_name.to_owned(),
            };
            let inner = self.inner.read().expect("in-memory store lock poisoned");
            let Some(stream) = inner.streams.get(&key) else {
                return Ok(false);
            };
            let events = self.decode_rows(&stream.rows)?;
            Ok(events.iter().any(|stored| stored == event))
        })();
        std::future::ready(result)
    }

    #[tracing::instrument(skip(self))]
    fn find_all<'a>(
        &'a self,
        aggregate_id: Uuid,
        aggregate_name: &'a str,
    ) -> impl Future<Output = Result<Vec<E>, Self::Error>> + Send + 'a {
        let result = (|| {
            let key = StreamKey {
                aggregate_id,
                aggregate_name: aggregate_name.to_owned(),
            };
            let inner = self.inner.read().expect("in-memory store lock poisoned");
            match inner.streams.get(&key) {
                Some(stream) => self.decode_rows(&stream.rows),
                None => Ok(Vec::new()),
            }
        })();
        std::future::ready(result)
    }

    #[tracing::instrument(skip(self))]
    fn find_all_by_aggregate_id<'a>(
        &'a self,
        aggregate_id: Uuid,
    ) -> impl Future<Output = Result<Vec<E>, Self::Error>> + Send + 'a {
        let result = (|| {
            let inner = self.inner.read().expect("in-memory store lock poisoned");
            let mut rows: Vec<&StoredRow> = inner
                .streams
                .iter()
                .filter(|(key, _)| key.aggregate_id == aggregate_id)
                .flat_map(|(_, stream)| stream.rows.iter())
                .collect();
            rows.sort_by_key(|row| row.order_of_occurrence);
            rows.into_iter()
                .map(|row| {
                    Ok(self
                        .versioning
                        .to_event(&row.payload, &row.event_name, row.event_version)?)
                })
                .collect()
        })();
        std::future::ready(result)
    }

    #[tracing::instrument(skip(self))]
    fn find_all_grouped<'a>(
        &'a self,
        aggregate_name: &'a str,
    ) -> impl Future<Output = Result<HashMap<Uuid, Vec<E>>, Self::Error>> + Send + 'a {
        let result = (|| {
            let inner = self.inner.read().expect("in-memory store lock poisoned");
            let mut grouped = HashMap::new();
            for (key, stream) in &inner.streams {
                if key.aggregate_name != aggregate_name || stream.rows.is_empty() {
                    continue;
                }
                grouped.insert(key.aggregate_id, self.decode_rows(&stream.rows)?);
            }
            Ok(grouped)
        })();
        std::future::ready(result)
    }

    #[tracing::instrument(skip(self, to_event), fields(event_id = %to_event.event_id()))]
    fn find_all_to_event<'a>(
        &'a self,
        to_event: &'a E,
        aggregate_name: &'a str,
    ) -> impl Future<Output = Result<Vec<E>, Self::Error>> + Send + 'a {
        let result = (|| {
            let key = StreamKey {
                aggregate_id: to_event.aggregate_id(),
                aggregate_name: aggregate_name.to_owned(),
            };
            let inner = self.inner.read().expect("in-memory store lock poisoned");
            let Some(stream) = inner.streams.get(&key) else {
                return Ok(Vec::new());
            };
            let cutoff = stream
                .rows
                .iter()
                .position(|row| row.event_id == to_event.event_id());
            match cutoff {
                Some(index) => self.decode_rows(&stream.rows[..=index]),
                // Unknown event id: nothing to replay up to.
                None => Ok(Vec::new()),
            }
        })();
        std::future::ready(result)
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    use super::*;
    use crate::{event::TypeTag, versioning::NoVersioning};

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    struct Incremented {
        event_id: Uuid,
        counter_id: Uuid,
        by: i64,
    }

    #[derive(Clone, Debug, PartialEq)]
    enum CounterEvent {
        Incremented(Incremented),
    }

    impl From<Incremented> for CounterEvent {
        fn from(e: Incremented) -> Self {
            Self::Incremented(e)
        }
    }

    impl Event for CounterEvent {
        fn event_id(&self) -> Uuid {
            let Self::Incremented(e) = self;
            e.event_id
        }

        fn aggregate_id(&self) -> Uuid {
            let Self::Incremented(e) = self;
            e.counter_id
        }

        fn type_tag(&self) -> TypeTag {
            TypeTag::of::<Incremented>()
        }
    }

    fn store() -> Store<CounterEvent, NoVersioning<CounterEvent>> {
        let mut versioning = NoVersioning::new();
        versioning
            .register::<Incremented, _>("CounterIncremented", |e| {
                let CounterEvent::Incremented(inner) = e;
                Some(inner)
            })
            .unwrap();
        Store::new(versioning)
    }

    fn incremented(counter_id: Uuid, by: i64) -> CounterEvent {
        CounterEvent::Incremented(Incremented {
            event_id: Uuid::new_v4(),
            counter_id,
            by,
        })
    }

    #[tokio::test]
    async fn version_is_none_for_unknown_stream() {
        let store = store();
        let version = store
            .stream_version(Uuid::new_v4(), "Counter")
            .await
            .unwrap();
        assert!(version.is_none());
    }

    #[tokio::test]
    async fn saves_bump_the_version_by_one() {
        let store = store();
        let counter_id = Uuid::new_v4();

        for expected in 1..=3 {
            store
                .save(&incremented(counter_id, 1), "Counter")
                .await
                .unwrap();
            let version = store.stream_version(counter_id, "Counter").await.unwrap();
            assert_eq!(version, Some(expected));
        }
    }

    #[tokio::test]
    async fn find_all_preserves_append_order() {
        let store = store();
        let counter_id = Uuid::new_v4();
        let events: Vec<_> = (1..=5).map(|by| incremented(counter_id, by)).collect();

        for event in &events {
            store.save(event, "Counter").await.unwrap();
        }

        let loaded = store.find_all(counter_id, "Counter").await.unwrap();
        assert_eq!(loaded, events);
    }

    #[tokio::test]
    async fn conditional_save_rejects_stale_version() {
        let store = store();
        let counter_id = Uuid::new_v4();

        store
            .save(&incremented(counter_id, 1), "Counter")
            .await
            .unwrap();

        let error = store
            .save_expecting(&incremented(counter_id, 2), "Counter", 0)
            .await
            .unwrap_err();
        match error {
            InMemoryError::Conflict(conflict) => {
                assert_eq!(conflict.expected, 0);
                assert_eq!(conflict.actual, 1);
            }
            other => panic!("expected conflict, got {other}"),
        }

        // The matching version succeeds.
        store
            .save_expecting(&incremented(counter_id, 2), "Counter", 1)
            .await
            .unwrap();
        let version = store.stream_version(counter_id, "Counter").await.unwrap();
        assert_eq!(version, Some(2));
    }

    #[tokio::test]
    async fn conditional_save_on_missing_stream_fails() {
        let store = store();
        let error = store
            .save_expecting(&incremented(Uuid::new_v4(), 1), "Counter", 0)
            .await
            .unwrap_err();
        assert!(matches!(error, InMemoryError::StreamNotFound(_)));
    }

    #[tokio::test]
    async fn strict_store_rejects_implicit_stream_creation() {
        let store = store().require_existing_streams();
        let counter_id = Uuid::new_v4();
        let event = incremented(counter_id, 1);

        let error = store.save(&event, "Counter").await.unwrap_err();
        assert!(matches!(error, InMemoryError::StreamNotFound(_)));

        store
            .ensure_stream_exists(counter_id, "Counter")
            .await
            .unwrap();
        store.save(&event, "Counter").await.unwrap();
    }

    #[tokio::test]
    async fn ensure_stream_exists_is_idempotent() {
        let store = store();
        let counter_id = Uuid::new_v4();

        store
            .ensure_stream_exists(counter_id, "Counter")
            .await
            .unwrap();
        store
            .save(&incremented(counter_id, 1), "Counter")
            .await
            .unwrap();
        store
            .ensure_stream_exists(counter_id, "Counter")
            .await
            .unwrap();

        let version = store.stream_version(counter_id, "Counter").await.unwrap();
        assert_eq!(version, Some(1));
    }

    #[tokio::test]
    async fn same_id_under_different_names_is_two_streams() {
        let store = store();
        let id = Uuid::new_v4();

        store.save(&incremented(id, 1), "Counter").await.unwrap();
        store.save(&incremented(id, 2), "Audit").await.unwrap();
        store.save(&incremented(id, 3), "Audit").await.unwrap();

        assert_eq!(store.stream_version(id, "Counter").await.unwrap(), Some(1));
        assert_eq!(store.stream_version(id, "Audit").await.unwrap(), Some(2));
        assert_eq!(store.find_all_by_aggregate_id(id).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn contains_compares_whole_events() {
        let store = store();
        let counter_id = Uuid::new_v4();
        let stored = incremented(counter_id, 1);
        let other = incremented(counter_id, 1);

        store.save(&stored, "Counter").await.unwrap();

        assert!(store.contains(&stored, "Counter").await.unwrap());
        // Same payload, different event id.
        assert!(!store.contains(&other, "Counter").await.unwrap());
    }

    #[tokio::test]
    async fn find_all_to_event_truncates_the_stream() {
        let store = store();
        let counter_id = Uuid::new_v4();
        let events: Vec<_> = (1..=4).map(|by| incremented(counter_id, by)).collect();

        for event in &events {
            store.save(event, "Counter").await.unwrap();
        }

        let prefix = store
            .find_all_to_event(&events[1], "Counter")
            .await
            .unwrap();
        assert_eq!(prefix, events[..2]);
    }

    #[tokio::test]
    async fn find_all_to_event_with_unknown_id_is_empty() {
        let store = store();
        let counter_id = Uuid::new_v4();

        store
            .save(&incremented(counter_id, 1), "Counter")
            .await
            .unwrap();

        let never_stored = incremented(counter_id, 2);
        let prefix = store
            .find_all_to_event(&never_stored, "Counter")
            .await
            .unwrap();
        assert!(prefix.is_empty());
    }

    #[tokio::test]
    async fn find_all_grouped_skips_empty_streams() {
        let store = store();
        let active = Uuid::new_v4();
        let idle = Uuid::new_v4();

        store.ensure_stream_exists(idle, "Counter").await.unwrap();
        store.save(&incremented(active, 1), "Counter").await.unwrap();
        store.save(&incremented(active, 2), "Counter").await.unwrap();

        let grouped = store.find_all_grouped("Counter").await.unwrap();
        assert_eq!(grouped.len(), 1);
        assert_eq!(grouped[&active].len(), 2);
    }

    #[tokio::test]
    async fn concurrent_first_appends_share_one_stream() {
        let store = store();
        let counter_id = Uuid::new_v4();
        let a = incremented(counter_id, 1);
        let b = incremented(counter_id, 2);

        let (ra, rb) = tokio::join!(store.save(&a, "Counter"), store.save(&b, "Counter"));
        ra.unwrap();
        rb.unwrap();

        let version = store.stream_version(counter_id, "Counter").await.unwrap();
        assert_eq!(version, Some(2));
        assert_eq!(store.find_all(counter_id, "Counter").await.unwrap().len(), 2);
    }
}
