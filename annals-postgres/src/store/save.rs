use annals_core::{
    concurrency::{OptimisticLockingConflict, StreamNotFound},
    event::Event,
    versioning::VersioningStrategy,
};
use sqlx::PgExecutor;
use uuid::Uuid;

use super::Store;
use crate::Error;

/// Inserts the event at the stream's current version plus one. The
/// version predicate (when present) and the unique constraint on
/// `(stream_id, aggregate_version)` are the only concurrency control.
const INSERT_EVENT: &str = r"
    INSERT INTO event (id, aggregate_version, stream_id, payload, event_name, event_version)
    SELECT $1, ais.aggregate_version + 1, ais.stream_id, $2, $3, $4
    FROM aggregate_in_stream ais
    WHERE ais.aggregate_id = $5 AND ais.aggregate_name = $6
    RETURNING aggregate_version
";

const INSERT_EVENT_AT_VERSION: &str = r"
    INSERT INTO event (id, aggregate_version, stream_id, payload, event_name, event_version)
    SELECT $1, ais.aggregate_version + 1, ais.stream_id, $2, $3, $4
    FROM aggregate_in_stream ais
    WHERE ais.aggregate_id = $5 AND ais.aggregate_name = $6 AND ais.aggregate_version = $7
    RETURNING aggregate_version
";

/// Bumps the stream row only if nobody else already did.
const BUMP_STREAM_VERSION: &str = r"
    UPDATE aggregate_in_stream
    SET aggregate_version = $1
    WHERE aggregate_id = $2 AND aggregate_name = $3 AND aggregate_version = $1 - 1
";

const CREATE_STREAM: &str = r"
    INSERT INTO aggregate_in_stream (aggregate_id, aggregate_name, aggregate_version, stream_id)
    VALUES ($1, $2, 0, $3)
    ON CONFLICT (aggregate_id, aggregate_name) DO NOTHING
";

/// Outcome of one append attempt.
pub(in crate::store) enum Attempt {
    Appended(i64),
    /// Another writer got in between the version read and the insert.
    Raced,
    /// No stream row matched the `(aggregate_id, aggregate_name)` pair.
    MissingStream,
}

/// An event translated to its stored form, once per save rather than
/// once per attempt.
pub(in crate::store) struct StagedEvent {
    pub event_id: Uuid,
    payload: serde_json::Value,
    event_name: String,
    event_version: i32,
}

/// The constraint whose violation means a concurrent writer won the
/// version race. Other unique violations (the `event.id` primary key
/// in particular) are real storage errors and must not be retried.
const VERSION_RACE_CONSTRAINT: &str = "event_stream_version_key";

fn is_version_race(error: &sqlx::Error) -> bool {
    matches!(
        error,
        sqlx::Error::Database(db)
            if db.is_unique_violation() && db.constraint() == Some(VERSION_RACE_CONSTRAINT)
    )
}

impl<E, V> Store<E, V>
where
    E: Event,
    V: VersioningStrategy<E> + 'static,
{
    pub(in crate::store) fn stage(&self, event: &E) -> Result<StagedEvent, Error> {
        let mapping = self.versioning.name_and_version(event)?;
        let payload = self.versioning.to_body(event)?;
        Ok(StagedEvent {
            event_id: event.event_id(),
            payload,
            event_name: mapping.name,
            event_version: i32::from(mapping.version),
        })
    }

    /// Insert a stream row at version 0, doing nothing if one already
    /// exists. A fresh stream id is generated and discarded when the
    /// row turns out to exist.
    pub(in crate::store) async fn ensure_stream_row<'e>(
        executor: impl PgExecutor<'e>,
        aggregate_id: Uuid,
        aggregate_name: &str,
    ) -> Result<(), Error> {
        sqlx::query(CREATE_STREAM)
            .bind(aggregate_id)
            .bind(aggregate_name)
            .bind(Uuid::new_v4())
            .execute(executor)
            .await
            .map(|_| ())
            .map_err(|e| Error::storage(format!("stream {aggregate_name}"), e))
    }

    /// One transactional append attempt.
    ///
    /// Dropping the transaction on the race paths rolls it back.
    async fn try_append(
        &self,
        staged: &StagedEvent,
        aggregate_id: Uuid,
        aggregate_name: &str,
        expected_version: Option<i64>,
    ) -> Result<Attempt, Error> {
        let context = || format!("aggregate {aggregate_id} in stream {aggregate_name}");

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| Error::storage(context(), e))?;

        if self.create_streams_on_save && expected_version.is_none() {
            Self::ensure_stream_row(&mut *tx, aggregate_id, aggregate_name).await?;
        }

        let insert = match expected_version {
            Some(expected) => sqlx::query_scalar::<_, i64>(INSERT_EVENT_AT_VERSION)
                .bind(staged.event_id)
                .bind(&staged.payload)
                .bind(&staged.event_name)
                .bind(staged.event_version)
                .bind(aggregate_id)
                .bind(aggregate_name)
                .bind(expected)
                .fetch_optional(&mut *tx)
                .await,
            None => sqlx::query_scalar::<_, i64>(INSERT_EVENT)
                .bind(staged.event_id)
                .bind(&staged.payload)
                .bind(&staged.event_name)
                .bind(staged.event_version)
                .bind(aggregate_id)
                .bind(aggregate_name)
                .fetch_optional(&mut *tx)
                .await,
        };

        let new_version = match insert {
            Ok(Some(version)) => version,
            // With a version predicate, no matching row means the
            // stream is gone or the version moved; the caller decides
            // which. Without one it can only mean a missing stream.
            Ok(None) => {
                return Ok(if expected_version.is_some() {
                    Attempt::Raced
                } else {
                    Attempt::MissingStream
                });
            }
            Err(e) if is_version_race(&e) => return Ok(Attempt::Raced),
            Err(e) => return Err(Error::storage(context(), e)),
        };

        let updated = sqlx::query(BUMP_STREAM_VERSION)
            .bind(new_version)
            .bind(aggregate_id)
            .bind(aggregate_name)
            .execute(&mut *tx)
            .await
            .map_err(|e| Error::storage(context(), e))?;
        if updated.rows_affected() == 0 {
            return Ok(Attempt::Raced);
        }

        tx.commit().await.map_err(|e| Error::storage(context(), e))?;
        Ok(Attempt::Appended(new_version))
    }

    pub(in crate::store) async fn save_with_retries(
        &self,
        event: &E,
        aggregate_name: &str,
    ) -> Result<(), Error> {
        let staged = self.stage(event)?;
        let aggregate_id = event.aggregate_id();

        for attempt in 1..=self.max_save_attempts {
            match self
                .try_append(&staged, aggregate_id, aggregate_name, None)
                .await?
            {
                Attempt::Appended(version) => {
                    tracing::debug!(version, attempt, "event appended to stream");
                    return Ok(());
                }
                Attempt::Raced => {
                    tracing::debug!(attempt, "append lost a version race, retrying");
                }
                Attempt::MissingStream => {
                    return Err(StreamNotFound {
                        aggregate_id,
                        aggregate_name: aggregate_name.to_owned(),
                    }
                    .into());
                }
            }
        }

        Err(Error::SaveRetriesExhausted {
            event_id: staged.event_id,
            aggregate_id,
            aggregate_name: aggregate_name.to_owned(),
            attempts: self.max_save_attempts,
        })
    }

    pub(in crate::store) async fn save_at_version(
        &self,
        event: &E,
        aggregate_name: &str,
        expected_version: i64,
    ) -> Result<(), Error> {
        let staged = self.stage(event)?;
        let aggregate_id = event.aggregate_id();

        match self
            .try_append(&staged, aggregate_id, aggregate_name, Some(expected_version))
            .await?
        {
            Attempt::Appended(version) => {
                tracing::debug!(version, "event appended to stream");
                Ok(())
            }
            // Conditional saves are never retried internally. Look up
            // what actually happened and report it.
            Attempt::Raced | Attempt::MissingStream => {
                match self
                    .fetch_stream_version(aggregate_id, aggregate_name)
                    .await?
                {
                    Some(actual) => Err(OptimisticLockingConflict {
                        aggregate_id,
                        aggregate_name: aggregate_name.to_owned(),
                        expected: expected_version,
                        actual,
                    }
                    .into()),
                    None => Err(StreamNotFound {
                        aggregate_id,
                        aggregate_name: aggregate_name.to_owned(),
                    }
                    .into()),
                }
            }
        }
    }
}
