use serde::{de::DeserializeOwned, Serialize};

use super::{VersioningError, VersioningStrategy};
use crate::{
    codec::{BodyCodec, JsonCodec},
    event::Event,
    typemap::{EventTypeMap, MappingError, NameAndVersion},
};

/// The version written for every event under this strategy.
const CONSTANT_VERSION: u16 = 1;

/// Strategy for event types that never change shape.
///
/// Each name maps to exactly one payload type. A constant version of
/// `1` is written on save and the stored version is ignored entirely
/// on read, so streams written before versions were recorded stay
/// readable.
pub struct NoVersioning<E, C = JsonCodec> {
    map: EventTypeMap<E, C>,
}

impl<E> NoVersioning<E> {
    /// An empty strategy using the default [`JsonCodec`].
    #[must_use]
    pub fn new() -> Self {
        Self {
            map: EventTypeMap::new(),
        }
    }
}

impl<E> Default for NoVersioning<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E, C> NoVersioning<E, C>
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

    /// Register the single shape stored under `name`.
    ///
    /// # Errors
    ///
    /// Fails when the name or the payload type is already registered.
    pub fn register<P, F>(&mut self, name: impl Into<String>, project: F) -> Result<(), MappingError>
    where
        P: Serialize + DeserializeOwned + Send + Sync + 'static,
        E: From<P>,
        F: Fn(&E) -> Option<&P> + Send + Sync + 'static,
    {
        self.map.register::<P, F>(name, CONSTANT_VERSION, project)
    }
}

impl<E, C> VersioningStrategy<E> for NoVersioning<E, C>
where
    E: Event,
    C: BodyCodec,
{
    fn to_event(
        &self,
        body: &serde_json::Value,
        name: &str,
        _version: u16,
    ) -> Result<E, VersioningError> {
        self.map.decode_by_name(body, name)
    }

    fn name_and_version(&self, event: &E) -> Result<NameAndVersion, VersioningError> {
        Ok(self.map.name_and_version(event.type_tag())?)
    }

    fn to_body(&self, event: &E) -> Result<serde_json::Value, VersioningError> {
        self.map.encode(event)
    }
}
