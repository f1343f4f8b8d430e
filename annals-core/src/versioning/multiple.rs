use serde::{de::DeserializeOwned, Serialize};

use super::{VersioningError, VersioningStrategy};
use crate::{
    codec::{BodyCodec, JsonCodec},
    event::Event,
    typemap::{EventTypeMap, MappingError, NameAndVersion},
};

/// Strategy that keeps every historical shape as a first-class type.
///
/// Each `(name, version)` pair maps to its own registered payload
/// type, and all of them remain constructible and appendable. Domain
/// logic must be prepared to fold every registered shape.
pub struct MultipleVersions<E, C = JsonCodec> {
    map: EventTypeMap<E, C>,
}

impl<E> MultipleVersions<E> {
    /// An empty strategy using the default [`JsonCodec`].
    #[must_use]
    pub fn new() -> Self {
        Self {
            map: EventTypeMap::new(),
        }
    }
}

impl<E> Default for MultipleVersions<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E, C> MultipleVersions<E, C>
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

    /// Register the shape stored under `(name, version)`.
    ///
    /// # Errors
    ///
    /// Fails when the pair or the payload type is already registered.
    pub fn register<P, F>(
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
}

impl<E, C> VersioningStrategy<E> for MultipleVersions<E, C>
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
