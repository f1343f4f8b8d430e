use serde::{de::DeserializeOwned, Serialize};

use super::{VersioningError, VersioningStrategy};
use crate::{
    codec::{BodyCodec, JsonCodec},
    event::Event,
    typemap::{EventTypeMap, MappingError, NameAndVersion},
};

/// Strategy that hands historical bodies to the caller as raw JSON.
///
/// Instead of declaring a Rust type per historical shape, a wrapper
/// constructor receives the stored body untouched and builds a value
/// that extracts fields on demand. Useful when old shapes are too
/// irregular to model as structs, at the cost of field access being
/// checked at read time rather than decode time.
pub struct Wrapping<E, C = JsonCodec> {
    map: EventTypeMap<E, C>,
}

impl<E> Wrapping<E> {
    /// An empty strategy using the default [`JsonCodec`].
    #[must_use]
    pub fn new() -> Self {
        Self {
            map: EventTypeMap::new(),
        }
    }
}

impl<E> Default for Wrapping<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E, C> Wrapping<E, C>
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

    /// Register a wrapper constructor for a historical shape.
    ///
    /// Bodies stored at `(name, version)` are passed to `wrap` as raw
    /// JSON, bypassing the codec.
    ///
    /// # Errors
    ///
    /// Fails when the pair is already registered.
    pub fn register_wrapper<F>(
        &mut self,
        name: impl Into<String>,
        version: u16,
        wrap: F,
    ) -> Result<(), MappingError>
    where
        F: Fn(serde_json::Value) -> E + Send + Sync + 'static,
    {
        self.map.register_raw(name, version, wrap)
    }
}

impl<E, C> VersioningStrategy<E> for Wrapping<E, C>
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

#[cfg(test)]
mod tests {
    use serde::Deserialize;
    use uuid::Uuid;

    use super::*;
    use crate::event::TypeTag;

    #[derive(Clone, Debug, PartialEq, serde::Serialize, Deserialize)]
    struct Tagged {
        event_id: Uuid,
        doc_id: Uuid,
        tag: String,
    }

    #[derive(Clone, Debug, PartialEq)]
    enum DocEvent {
        Tagged(Tagged),
        /// Pre-migration body, kept as raw JSON.
        LegacyTagged {
            body: serde_json::Value,
        },
    }

    impl DocEvent {
        fn tag(&self) -> Option<&str> {
            match self {
                Self::Tagged(e) => Some(&e.tag),
                // The field was called "label" before the rename.
                Self::LegacyTagged { body } => body.get("label").and_then(|v| v.as_str()),
            }
        }
    }

    impl Event for DocEvent {
        fn event_id(&self) -> Uuid {
            match self {
                Self::Tagged(e) => e.event_id,
                Self::LegacyTagged { body } => body
                    .get("event_id")
                    .and_then(|v| v.as_str())
                    .and_then(|s| Uuid::parse_str(s).ok())
                    .unwrap_or_default(),
            }
        }

        fn aggregate_id(&self) -> Uuid {
            match self {
                Self::Tagged(e) => e.doc_id,
                Self::LegacyTagged { body } => body
                    .get("doc_id")
                    .and_then(|v| v.as_str())
                    .and_then(|s| Uuid::parse_str(s).ok())
                    .unwrap_or_default(),
            }
        }

        fn type_tag(&self) -> TypeTag {
            TypeTag::of::<Tagged>()
        }
    }

    impl From<Tagged> for DocEvent {
        fn from(e: Tagged) -> Self {
            Self::Tagged(e)
        }
    }

    fn strategy() -> Wrapping<DocEvent> {
        let mut versioning = Wrapping::new();
        versioning
            .register_latest::<Tagged, _>("DocumentTagged", 2, |e| match e {
                DocEvent::Tagged(inner) => Some(inner),
                DocEvent::LegacyTagged { .. } => None,
            })
            .unwrap();
        versioning
            .register_wrapper("DocumentTagged", 1, |body| DocEvent::LegacyTagged { body })
            .unwrap();
        versioning
    }

    #[test]
    fn wrapper_reads_renamed_field_from_raw_body() {
        let versioning = strategy();
        let body = serde_json::json!({
            "event_id": Uuid::new_v4(),
            "doc_id": Uuid::new_v4(),
            "label": "archived",
        });

        let decoded = versioning.to_event(&body, "DocumentTagged", 1).unwrap();
        assert_eq!(decoded.tag(), Some("archived"));
    }

    #[test]
    fn latest_shape_roundtrips_through_codec() {
        let versioning = strategy();
        let event = DocEvent::Tagged(Tagged {
            event_id: Uuid::new_v4(),
            doc_id: Uuid::new_v4(),
            tag: "draft".into(),
        });

        let body = versioning.to_body(&event).unwrap();
        assert_eq!(
            versioning.to_event(&body, "DocumentTagged", 2).unwrap(),
            event
        );
    }
}
