mod load;
mod save;

use std::{collections::HashMap, marker::PhantomData, sync::Arc};

use annals_core::{
    event::Event,
    store::EventStore,
    versioning::VersioningStrategy,
};
use sqlx::PgPool;
use uuid::Uuid;

use crate::Error;

/// How many times an unconditional append retries the version race
/// before giving up.
const DEFAULT_MAX_SAVE_ATTEMPTS: u32 = 16;

/// A `PostgreSQL`-backed [`EventStore`].
///
/// Appends never take row locks. Each attempt reads the stream's
/// current version, inserts the event at version plus one and bumps
/// the stream row, all in one transaction; the unique constraint on
/// `(stream_id, aggregate_version)` rejects the loser of a concurrent
/// race. Unconditional saves retry the race internally, conditional
/// saves surface it as a conflict.
pub struct Store<E, V> {
    pub(crate) pool: PgPool,
    pub(crate) versioning: Arc<V>,
    pub(crate) create_streams_on_save: bool,
    pub(crate) max_save_attempts: u32,
    _marker: PhantomData<fn() -> E>,
}

impl<E, V> Clone for Store<E, V> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            versioning: Arc::clone(&self.versioning),
            create_streams_on_save: self.create_streams_on_save,
            max_save_attempts: self.max_save_attempts,
            _marker: PhantomData,
        }
    }
}

impl<E, V> Store<E, V> {
    /// Construct a `PostgreSQL` event store from a connection pool.
    #[must_use]
    pub fn new(pool: PgPool, versioning: V) -> Self {
        Self {
            pool,
            versioning: Arc::new(versioning),
            create_streams_on_save: true,
            max_save_attempts: DEFAULT_MAX_SAVE_ATTEMPTS,
            _marker: PhantomData,
        }
    }

    /// Reject appends to streams that were never created.
    ///
    /// By default a missing stream is created on first append; with
    /// this set, appends fail until
    /// [`ensure_stream_exists`](EventStore::ensure_stream_exists) has
    /// been called for the pair.
    #[must_use]
    pub fn require_existing_streams(mut self) -> Self {
        self.create_streams_on_save = false;
        self
    }

    /// Change the retry ceiling for unconditional appends.
    #[must_use]
    pub fn with_max_save_attempts(mut self, attempts: u32) -> Self {
        self.max_save_attempts = attempts.max(1);
        self
    }

    /// Apply the initial schema (idempotent).
    ///
    /// This uses `CREATE TABLE IF NOT EXISTS` style DDL so it can be
    /// run on startup.
    ///
    /// # Errors
    ///
    /// Returns a `sqlx::Error` if any of the schema creation queries
    /// fail.
    #[tracing::instrument(skip(self))]
    pub async fn migrate(&self) -> Result<(), sqlx::Error> {
        // Stream rows carry the current version for optimistic locking.
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS aggregate_in_stream (
                aggregate_id      UUID NOT NULL,
                aggregate_name    TEXT NOT NULL,
                aggregate_version BIGINT NOT NULL,
                stream_id         UUID NOT NULL UNIQUE,
                PRIMARY KEY (aggregate_id, aggregate_name)
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS event (
                id                  UUID PRIMARY KEY,
                aggregate_version   BIGINT NOT NULL,
                stream_id           UUID NOT NULL REFERENCES aggregate_in_stream(stream_id),
                payload             JSONB NOT NULL,
                event_name          TEXT NOT NULL,
                event_version       INT NOT NULL,
                order_of_occurrence BIGSERIAL,
                CONSTRAINT event_stream_version_key UNIQUE (stream_id, aggregate_version)
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"CREATE INDEX IF NOT EXISTS event_by_stream_and_order
              ON event(stream_id, order_of_occurrence)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

impl<E, V> EventStore<E> for Store<E, V>
where
    E: Event,
    V: VersioningStrategy<E> + 'static,
{
    type Error = Error;

    #[tracing::instrument(skip(self, event), fields(aggregate_id = %event.aggregate_id()))]
    async fn save<'a>(&'a self, event: &'a E, aggregate_name: &'a str) -> Result<(), Self::Error> {
        self.save_with_retries(event, aggregate_name).await
    }

    #[tracing::instrument(skip(self, event), fields(aggregate_id = %event.aggregate_id()))]
    async fn save_expecting<'a>(
        &'a self,
        event: &'a E,
        aggregate_name: &'a str,
        expected_version: i64,
    ) -> Result<(), Self::Error> {
        self.save_at_version(event, aggregate_name, expected_version)
            .await
    }

    #[tracing::instrument(skip(self))]
    async fn ensure_stream_exists<'a>(
        &'a self,
        aggregate_id: Uuid,
        aggregate_name: &'a str,
    ) -> Result<(), Self::Error> {
        Self::ensure_stream_row(&self.pool, aggregate_id, aggregate_name).await
    }

    async fn stream_version<'a>(
        &'a self,
        aggregate_id: Uuid,
        aggregate_name: &'a str,
    ) -> Result<Option<i64>, Self::Error> {
        self.fetch_stream_version(aggregate_id, aggregate_name)
            .await
    }

    #[tracing::instrument(skip(self, event), fields(event_id = %event.event_id()))]
    async fn contains<'a>(
        &'a self,
        event: &'a E,
        aggregate_name: &'a str,
    ) -> Result<bool, Self::Error>
    where
        E: PartialEq,
    {
        let stored = self
            .load_by_event_id(event.event_id(), event.aggregate_id(), aggregate_name)
            .await?;
        Ok(stored.is_some_and(|stored| stored == *event))
    }

    #[tracing::instrument(skip(self))]
    async fn find_all<'a>(
        &'a self,
        aggregate_id: Uuid,
        aggregate_name: &'a str,
    ) -> Result<Vec<E>, Self::Error> {
        self.load_stream(aggregate_id, aggregate_name).await
    }

    #[tracing::instrument(skip(self))]
    async fn find_all_by_aggregate_id<'a>(&'a self, aggregate_id: Uuid) -> Result<Vec<E>, Self::Error> {
        self.load_all_for_aggregate_id(aggregate_id).await
    }

    #[tracing::instrument(skip(self))]
    async fn find_all_grouped<'a>(
        &'a self,
        aggregate_name: &'a str,
    ) -> Result<HashMap<Uuid, Vec<E>>, Self::Error> {
        self.load_all_grouped(aggregate_name).await
    }

    #[tracing::instrument(skip(self, to_event), fields(event_id = %to_event.event_id()))]
    async fn find_all_to_event<'a>(
        &'a self,
        to_event: &'a E,
        aggregate_name: &'a str,
    ) -> Result<Vec<E>, Self::Error> {
        self.load_stream_to_event(
            to_event.aggregate_id(),
            aggregate_name,
            to_event.event_id(),
        )
        .await
    }
}
