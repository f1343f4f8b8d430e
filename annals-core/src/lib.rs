//! Core traits and types for the annals event-sourcing engine.
//!
//! This crate provides the storage-agnostic building blocks:
//!
//! - [`event`] - The [`Event`](event::Event) trait and [`TypeTag`](event::TypeTag)
//! - [`codec`] - Payload (de)serialization boundary (`BodyCodec`, `JsonCodec`)
//! - [`typemap`] - The type ↔ (name, version) registry (`EventTypeMap`)
//! - [`versioning`] - Schema-evolution strategies (`VersioningStrategy`)
//! - [`concurrency`] - Shared optimistic-locking error types
//! - [`store`] - Event persistence contract (`EventStore`) and an
//!   in-memory reference implementation
//! - [`repository`] - Aggregate reconstruction by fold/replay
//!   (`AggregateRepository`)
//!
//! Most users should depend on the `annals` crate, which re-exports
//! these types together with the Postgres backend.

pub mod codec;
pub mod concurrency;
pub mod event;
pub mod repository;
pub mod store;
pub mod typemap;
pub mod versioning;
