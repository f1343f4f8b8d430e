//! Postgres-backed event store.
//!
//! This crate provides [`Store`], a `PostgreSQL` implementation of
//! [`annals_core::store::EventStore`].
//!
//! Streams live in two tables: `aggregate_in_stream` holds one row per
//! `(aggregate_id, aggregate_name)` pair with its current version, and
//! `event` holds the append-only log. A unique constraint on
//! `(stream_id, aggregate_version)` is the arbiter for concurrent
//! appends; no row locks are taken.

mod error;
mod store;

pub use error::Error;
pub use store::Store;
