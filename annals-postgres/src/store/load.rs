use std::collections::HashMap;

use annals_core::{event::Event, versioning::VersioningStrategy};
use sqlx::{postgres::PgRow, Row};
use uuid::Uuid;

use super::Store;
use crate::Error;

const SELECT_VERSION: &str = r"
    SELECT aggregate_version FROM aggregate_in_stream
    WHERE aggregate_id = $1 AND aggregate_name = $2
";

const SELECT_STREAM: &str = r"
    SELECT e.payload, e.event_name, e.event_version
    FROM aggregate_in_stream ais
    JOIN event e ON e.stream_id = ais.stream_id
    WHERE ais.aggregate_id = $1 AND ais.aggregate_name = $2
    ORDER BY e.order_of_occurrence ASC
";

/// A `NULL` subquery result (unknown event id) matches nothing, which
/// yields the empty prefix.
const SELECT_STREAM_TO_EVENT: &str = r"
    SELECT e.payload, e.event_name, e.event_version
    FROM aggregate_in_stream ais
    JOIN event e ON e.stream_id = ais.stream_id
    WHERE ais.aggregate_id = $1 AND ais.aggregate_name = $2
      AND e.order_of_occurrence <= (SELECT order_of_occurrence FROM event WHERE id = $3)
    ORDER BY e.order_of_occurrence ASC
";

const SELECT_BY_EVENT_ID: &str = r"
    SELECT e.payload, e.event_name, e.event_version
    FROM aggregate_in_stream ais
    JOIN event e ON e.stream_id = ais.stream_id
    WHERE ais.aggregate_id = $1 AND ais.aggregate_name = $2 AND e.id = $3
";

const SELECT_BY_AGGREGATE_ID: &str = r"
    SELECT e.payload, e.event_name, e.event_version
    FROM aggregate_in_stream ais
    JOIN event e ON e.stream_id = ais.stream_id
    WHERE ais.aggregate_id = $1
    ORDER BY e.order_of_occurrence ASC
";

const SELECT_GROUPED: &str = r"
    SELECT ais.aggregate_id, e.payload, e.event_name, e.event_version
    FROM aggregate_in_stream ais
    JOIN event e ON e.stream_id = ais.stream_id
    WHERE ais.aggregate_name = $1
    ORDER BY e.order_of_occurrence ASC
";

impl<E, V> Store<E, V>
where
    E: Event,
    V: VersioningStrategy<E> + 'static,
{
    fn decode_row(&self, row: &PgRow) -> Result<E, Error> {
        let payload: serde_json::Value = row
            .try_get("payload")
            .map_err(|e| Error::storage("stored event payload", e))?;
        let event_name: String = row
            .try_get("event_name")
            .map_err(|e| Error::storage("stored event name", e))?;
        let event_version: i32 = row
            .try_get("event_version")
            .map_err(|e| Error::storage("stored event version", e))?;

        let version =
            u16::try_from(event_version).map_err(|_| Error::InvalidEventVersion(event_version))?;
        Ok(self.versioning.to_event(&payload, &event_name, version)?)
    }

    fn decode_rows(&self, rows: &[PgRow]) -> Result<Vec<E>, Error> {
        rows.iter().map(|row| self.decode_row(row)).collect()
    }

    pub(in crate::store) async fn fetch_stream_version(
        &self,
        aggregate_id: Uuid,
        aggregate_name: &str,
    ) -> Result<Option<i64>, Error> {
        sqlx::query_scalar(SELECT_VERSION)
            .bind(aggregate_id)
            .bind(aggregate_name)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                Error::storage(format!("aggregate {aggregate_id} in stream {aggregate_name}"), e)
            })
    }

    pub(in crate::store) async fn load_stream(
        &self,
        aggregate_id: Uuid,
        aggregate_name: &str,
    ) -> Result<Vec<E>, Error> {
        let rows = sqlx::query(SELECT_STREAM)
            .bind(aggregate_id)
            .bind(aggregate_name)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                Error::storage(format!("aggregate {aggregate_id} in stream {aggregate_name}"), e)
            })?;
        self.decode_rows(&rows)
    }

    pub(in crate::store) async fn load_stream_to_event(
        &self,
        aggregate_id: Uuid,
        aggregate_name: &str,
        event_id: Uuid,
    ) -> Result<Vec<E>, Error> {
        let rows = sqlx::query(SELECT_STREAM_TO_EVENT)
            .bind(aggregate_id)
            .bind(aggregate_name)
            .bind(event_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                Error::storage(format!("aggregate {aggregate_id} in stream {aggregate_name}"), e)
            })?;
        self.decode_rows(&rows)
    }

    pub(in crate::store) async fn load_by_event_id(
        &self,
        event_id: Uuid,
        aggregate_id: Uuid,
        aggregate_name: &str,
    ) -> Result<Option<E>, Error> {
        let row = sqlx::query(SELECT_BY_EVENT_ID)
            .bind(aggregate_id)
            .bind(aggregate_name)
            .bind(event_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                Error::storage(format!("aggregate {aggregate_id} in stream {aggregate_name}"), e)
            })?;
        row.as_ref().map(|row| self.decode_row(row)).transpose()
    }

    pub(in crate::store) async fn load_all_for_aggregate_id(
        &self,
        aggregate_id: Uuid,
    ) -> Result<Vec<E>, Error> {
        let rows = sqlx::query(SELECT_BY_AGGREGATE_ID)
            .bind(aggregate_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| Error::storage(format!("aggregate {aggregate_id}"), e))?;
        self.decode_rows(&rows)
    }

    pub(in crate::store) async fn load_all_grouped(
        &self,
        aggregate_name: &str,
    ) -> Result<HashMap<Uuid, Vec<E>>, Error> {
        let rows = sqlx::query(SELECT_GROUPED)
            .bind(aggregate_name)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| Error::storage(format!("stream {aggregate_name}"), e))?;

        // Rows arrive in order of occurrence, so per-aggregate order is
        // preserved by pushing in sequence.
        let mut grouped: HashMap<Uuid, Vec<E>> = HashMap::new();
        for row in &rows {
            let aggregate_id: Uuid = row
                .try_get("aggregate_id")
                .map_err(|e| Error::storage(format!("stream {aggregate_name}"), e))?;
            grouped
                .entry(aggregate_id)
                .or_default()
                .push(self.decode_row(row)?);
        }
        Ok(grouped)
    }
}
