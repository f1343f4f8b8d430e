use serde::{de::DeserializeOwned, Serialize};

use super::{VersioningError, VersioningStrategy};
use crate::{
    codec::{BodyCodec, JsonCodec},
    event::Event,
    typemap::{EventTypeMap, MappingError, NameAndVersion},
};

/// Strategy that converts historical shapes to the latest one on read.
///
/// Only the latest shape of each event is a first-class type; earlier
/// shapes exist solely as decode targets whose values are immediately
/// upcast. Domain logic folds a single shape per event, and new events
/// are always written at the latest version.
pub struct Upcasting<E, C = JsonCodec> {
    map: EventTypeMap<E, C>,
}

impl<E> Upcasting<E> {
    /// An empty strategy using the default [`JsonCodec`].
    #[must_use]
    pub fn new() -> Self {
        Self {
            map: EventTypeMap::new(),
        }
    }
}

impl<E> Default for Upcasting<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E, C> Upcasting<E, C>
where
    E: Event,
    C: BodyCodec,
{
    #[must_use]
    pub fn with_codec(codec: C) -> Self {
        Self {
            map: EventTypeMap::with_codec(codec),
        }
    }

    /// Register the latest shape stored under `(name, version)`.
    ///
    /// New events of this type are written at this version.
    ///
    /// # Errors
    ///
    /// Fails when the pair or the payload type is already registered.
    pub fn register_latest<P, F>(
        &mut self,
        name: impl Into<String>,
        version: u16,
        project: F,
    ) -> Result<(), MappingError>
    where
        P: Serialize + DeserializeOwned + Send + Sync + 'static,
        E: From<P>,
        F: Fn(&E) -> Option<&P> + Send + Sync + 'static,
    {
        self.map.register::<P, F>(name, version, project)
    }

    /// Register a historical shape and its conversion to the latest.
    ///
    /// Bodies stored at `(name, version)` are decoded as `P` and
    /// passed to `upcast`; the historical type never reaches domain
    /// logic.
    ///
    /// # Errors
    ///
    /// Fails when the pair is already registered.
    pub fn register_upcast<P, F>(
        &mut self,
        name: impl Into<String>,
        version: u16,
        upcast: F,
    ) -> Result<(), MappingError>
    where
        P: DeserializeOwned + Send + Sync + 'static,
        F: Fn(P) -> E + Send + Sync + 'static,
    {
        self.map.register_decoder::<P, F>(name, version, upcast)
    }
}

impl<E, C> VersioningStrategy<E> for Upcasting<E, C>
where
    E: Event,
    C: BodyCodec,
{
    fn to_event(
        &self,
        body: &serde_json::Value,
        name: &str,
        version: u16,
    ) -> Result<E, VersioningError> {
        self.map.decode(body, name, version)
    }

    fn name_and_version(&self, event: &E) -> Result<NameAndVersion, VersioningError> {
        Ok(self.map.name_and_version(event.type_tag())?)
    }

    fn to_body(&self, event: &E) -> Result<serde_json::Value, VersioningError> {
        self.map.encode(event)
    }
}
