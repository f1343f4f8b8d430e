//! Schema-evolution strategies.
//!
//! A [`VersioningStrategy`] answers three questions for a store
//! backend: what `(name, version)` to write next to a payload, what
//! JSON body to write, and how to turn a stored `(body, name,
//! version)` triple back into a live event. The five provided
//! strategies differ only in how they treat historical payload shapes:
//!
//! - [`NoVersioning`] — one shape per name, the stored version is
//!   ignored on read.
//! - [`MultipleVersions`] — every historical shape stays a first-class
//!   registered type.
//! - [`Upcasting`] — historical shapes are decoded and converted to
//!   the latest shape on read.
//! - [`Wrapping`] — historical bodies are wrapped in a value that reads
//!   the raw JSON on demand.
//! - [`Mixed`] — routes each event name to one of the above.

use thiserror::Error;

use crate::{
    codec::BodyCodecError,
    event::Event,
    typemap::{MappingError, NameAndVersion},
};

mod mixed;
mod multiple;
mod no_version;
mod upcasting;
mod wrapping;

pub use mixed::Mixed;
pub use multiple::MultipleVersions;
pub use no_version::NoVersioning;
pub use upcasting::Upcasting;
pub use wrapping::Wrapping;

/// Errors raised while translating between live events and their
/// stored representation.
#[derive(Debug, Error)]
pub enum VersioningError {
    /// The registry has no mapping for the type or name involved.
    #[error(transparent)]
    Mapping(#[from] MappingError),
    /// The body codec rejected the payload.
    #[error(transparent)]
    Body(#[from] BodyCodecError),
}

/// Translates between live events and their stored `(body, name,
/// version)` representation.
///
/// Object-safe so that [`Mixed`] can hold a heterogeneous set of
/// strategies behind `dyn` pointers.
pub trait VersioningStrategy<E: Event>: Send + Sync {
    /// Reconstruct a live event from its stored representation.
    ///
    /// # Errors
    ///
    /// Fails when `(name, version)` is unregistered or the body does
    /// not match the registered shape.
    fn to_event(
        &self,
        body: &serde_json::Value,
        name: &str,
        version: u16,
    ) -> Result<E, VersioningError>;

    /// The `(name, version)` pair to store next to this event's body.
    ///
    /// # Errors
    ///
    /// Fails when the event's type was never registered.
    fn name_and_version(&self, event: &E) -> Result<NameAndVersion, VersioningError>;

    /// The JSON body to store for this event.
    ///
    /// # Errors
    ///
    /// Fails when the event's type was never registered or
    /// serialization fails.
    fn to_body(&self, event: &E) -> Result<serde_json::Value, VersioningError>;

    /// The stored name for this event.
    ///
    /// # Errors
    ///
    /// Fails when the event's type was never registered.
    fn to_name(&self, event: &E) -> Result<String, VersioningError> {
        self.name_and_version(event).map(|m| m.name)
    }

    /// The stored version for this event.
    ///
    /// # Errors
    ///
    /// Fails when the event's type was never registered.
    fn to_version(&self, event: &E) -> Result<u16, VersioningError> {
        self.name_and_version(event).map(|m| m.version)
    }
}
