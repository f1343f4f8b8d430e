//! Event-type registry.
//!
//! [`EventTypeMap`] owns the bidirectional mapping between a concrete
//! payload type and the stable [`NameAndVersion`] pair written next to
//! its body. Both directions must be injective: registering the same
//! `(name, version)` for a second type, or the same type under a
//! second `(name, version)`, is a configuration error and fails fast.
//!
//! The registry is populated at startup and read-only afterwards; all
//! lookups take `&self` and are safe for concurrent use once writes
//! are finished.

use std::{collections::HashMap, fmt};

use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

use crate::{
    codec::{BodyCodec, BodyCodecError, JsonCodec},
    event::{Event, TypeTag},
    versioning::VersioningError,
};

/// The stable `(name, version)` pair stored alongside each payload.
///
/// Decoupled from the Rust type name so that types may be renamed or
/// moved without breaking stored data.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct NameAndVersion {
    pub name: String,
    pub version: u16,
}

impl NameAndVersion {
    #[must_use]
    pub fn new(name: impl Into<String>, version: u16) -> Self {
        Self {
            name: name.into(),
            version,
        }
    }
}

impl fmt::Display for NameAndVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} v{}", self.name, self.version)
    }
}

/// Registry configuration and lookup errors.
///
/// These are programmer errors: they fail fast at registration or at
/// first lookup and are never retried.
#[derive(Debug, Error)]
pub enum MappingError {
    /// The event's concrete type was never registered.
    #[error("no mapping registered for event type {0}")]
    TypeNotFound(&'static str),
    /// The stored `(name, version)` pair was never registered.
    #[error("no mapping registered for event {0}")]
    NameNotFound(NameAndVersion),
    /// A version-agnostic lookup found no mapping for the name at all.
    #[error("no mapping registered for event name {name}")]
    UnknownName { name: String },
    /// A `(name, version)` pair was registered twice.
    #[error("event {mapping} is already registered for type {existing}")]
    NonUniqueName {
        mapping: NameAndVersion,
        existing: &'static str,
    },
    /// A payload type was registered under two `(name, version)` pairs.
    #[error("event type {type_name} is already registered as {existing}")]
    NonUniqueType {
        type_name: &'static str,
        existing: NameAndVersion,
    },
    /// A version-agnostic lookup hit a name with several versions.
    #[error("event name {name} is registered at multiple versions; a versioned lookup is required")]
    AmbiguousName { name: String },
    /// An event name was routed to two strategies (mixed versioning).
    #[error("event name {name} is already routed to a versioning strategy")]
    DuplicateRoute { name: String },
}

type DecodeFn<E, C> =
    Box<dyn Fn(&C, &serde_json::Value) -> Result<E, BodyCodecError> + Send + Sync>;
type EncodeFn<E, C> =
    Box<dyn Fn(&C, &E) -> Option<Result<serde_json::Value, BodyCodecError>> + Send + Sync>;

struct DecodeEntry<E, C> {
    payload_type: &'static str,
    decode: DecodeFn<E, C>,
}

struct EncodeEntry<E, C> {
    mapping: NameAndVersion,
    encode: EncodeFn<E, C>,
}

/// Tracks whether a bare event name resolves to exactly one version.
enum Bare {
    Unique(NameAndVersion),
    Ambiguous,
}

/// Bidirectional type ↔ `(name, version)` registry with the decode and
/// encode functions monomorphized at registration time.
///
/// Generic over the application event sum type `E` and the body codec
/// `C` (defaults to [`JsonCodec`]).
pub struct EventTypeMap<E, C = JsonCodec> {
    codec: C,
    decoders: HashMap<NameAndVersion, DecodeEntry<E, C>>,
    encoders: HashMap<TypeTag, EncodeEntry<E, C>>,
    bare_names: HashMap<String, Bare>,
}

impl<E> EventTypeMap<E> {
    /// An empty registry using the default [`JsonCodec`].
    ///
    /// Pinned to the default codec so that `EventTypeMap::new()`
    /// infers; use [`with_codec`](Self::with_codec) for a custom one.
    #[must_use]
    pub fn new() -> Self {
        Self::with_codec(JsonCodec)
    }
}

impl<E> Default for EventTypeMap<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E, C> EventTypeMap<E, C> {
    #[must_use]
    pub fn with_codec(codec: C) -> Self {
        Self {
            codec,
            decoders: HashMap::new(),
            encoders: HashMap::new(),
            bare_names: HashMap::new(),
        }
    }

    fn check_unique_name(&self, mapping: &NameAndVersion) -> Result<(), MappingError> {
        match self.decoders.get(mapping) {
            Some(existing) => Err(MappingError::NonUniqueName {
                mapping: mapping.clone(),
                existing: existing.payload_type,
            }),
            None => Ok(()),
        }
    }

    fn check_unique_tag(&self, tag: TypeTag) -> Result<(), MappingError> {
        match self.encoders.get(&tag) {
            Some(existing) => Err(MappingError::NonUniqueType {
                type_name: tag.type_name(),
                existing: existing.mapping.clone(),
            }),
            None => Ok(()),
        }
    }

    fn insert_decoder(&mut self, mapping: NameAndVersion, entry: DecodeEntry<E, C>) {
        self.bare_names
            .entry(mapping.name.clone())
            .and_modify(|bare| *bare = Bare::Ambiguous)
            .or_insert_with(|| Bare::Unique(mapping.clone()));
        self.decoders.insert(mapping, entry);
    }
}

impl<E, C> EventTypeMap<E, C>
where
    E: Event,
    C: BodyCodec,
{
    /// Register a bidirectional mapping for the payload type `P`.
    ///
    /// `project` extracts a reference to the payload from the sum type
    /// for the encode direction; it must return `Some` exactly for the
    /// variant holding `P`.
    ///
    /// # Errors
    ///
    /// Returns [`MappingError::NonUniqueName`] or
    /// [`MappingError::NonUniqueType`] when either direction is
    /// already bound.
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
        let mapping = NameAndVersion::new(name, version);
        let tag = TypeTag::of::<P>();
        self.check_unique_name(&mapping)?;
        self.check_unique_tag(tag)?;

        tracing::trace!(%mapping, payload_type = tag.type_name(), "registered event mapping");
        self.encoders.insert(
            tag,
            EncodeEntry {
                mapping: mapping.clone(),
                encode: Box::new(move |codec, event| project(event).map(|p| codec.encode(p))),
            },
        );
        self.insert_decoder(
            mapping,
            DecodeEntry {
                payload_type: tag.type_name(),
                decode: Box::new(|codec, body| codec.decode::<P>(body).map(E::from)),
            },
        );
        Ok(())
    }

    /// Register a decode-only mapping for a historical payload shape.
    ///
    /// The stored body is decoded as `P` and handed to `convert`,
    /// which lifts it into the sum type (typically after upcasting to
    /// the latest shape). No type tag is claimed, so the latest shape
    /// of the same event can still be registered with [`register`](Self::register).
    ///
    /// # Errors
    ///
    /// Returns [`MappingError::NonUniqueName`] when the `(name,
    /// version)` pair is already bound.
    pub fn register_decoder<P, F>(
        &mut self,
        name: impl Into<String>,
        version: u16,
        convert: F,
    ) -> Result<(), MappingError>
    where
        P: DeserializeOwned + Send + Sync + 'static,
        F: Fn(P) -> E + Send + Sync + 'static,
    {
        let mapping = NameAndVersion::new(name, version);
        self.check_unique_name(&mapping)?;

        tracing::trace!(
            %mapping,
            payload_type = std::any::type_name::<P>(),
            "registered decode-only event mapping"
        );
        self.insert_decoder(
            mapping,
            DecodeEntry {
                payload_type: std::any::type_name::<P>(),
                decode: Box::new(move |codec, body| codec.decode::<P>(body).map(&convert)),
            },
        );
        Ok(())
    }

    /// Register a decode-only mapping fed the raw stored JSON.
    ///
    /// Used by wrapper-based versioning: `construct` receives the body
    /// untouched and builds a value that reads fields out of it on
    /// demand. The codec is bypassed entirely.
    ///
    /// # Errors
    ///
    /// Returns [`MappingError::NonUniqueName`] when the `(name,
    /// version)` pair is already bound.
    pub fn register_raw<F>(
        &mut self,
        name: impl Into<String>,
        version: u16,
        construct: F,
    ) -> Result<(), MappingError>
    where
        F: Fn(serde_json::Value) -> E + Send + Sync + 'static,
    {
        let mapping = NameAndVersion::new(name, version);
        self.check_unique_name(&mapping)?;

        tracing::trace!(%mapping, "registered raw event mapping");
        self.insert_decoder(
            mapping,
            DecodeEntry {
                payload_type: "<raw json>",
                decode: Box::new(move |_codec, body| Ok(construct(body.clone()))),
            },
        );
        Ok(())
    }

    /// The stored `(name, version)` pair for a payload type tag.
    ///
    /// # Errors
    ///
    /// Returns [`MappingError::TypeNotFound`] when the tag was never
    /// registered.
    pub fn name_and_version(&self, tag: TypeTag) -> Result<NameAndVersion, MappingError> {
        self.encoders
            .get(&tag)
            .map(|entry| entry.mapping.clone())
            .ok_or_else(|| MappingError::TypeNotFound(tag.type_name()))
    }

    /// Encode an event's payload to its stored JSON body.
    ///
    /// # Errors
    ///
    /// Returns a mapping error when the event's type tag is
    /// unregistered (or disagrees with the registered projection), and
    /// a codec error when serialization fails.
    pub fn encode(&self, event: &E) -> Result<serde_json::Value, VersioningError> {
        let tag = event.type_tag();
        let entry = self
            .encoders
            .get(&tag)
            .ok_or_else(|| MappingError::TypeNotFound(tag.type_name()))?;
        match (entry.encode)(&self.codec, event) {
            Some(result) => Ok(result?),
            // The tag matched but the projection declined the value:
            // `Event::type_tag` and the registered projection disagree.
            None => Err(MappingError::TypeNotFound(tag.type_name()).into()),
        }
    }

    /// Decode a stored body registered under `(name, version)`.
    ///
    /// # Errors
    ///
    /// Returns [`MappingError::NameNotFound`] for unregistered pairs
    /// and a codec error when the body does not match the registered
    /// shape.
    pub fn decode(
        &self,
        body: &serde_json::Value,
        name: &str,
        version: u16,
    ) -> Result<E, VersioningError> {
        let mapping = NameAndVersion::new(name, version);
        let entry = self
            .decoders
            .get(&mapping)
            .ok_or(MappingError::NameNotFound(mapping))?;
        Ok((entry.decode)(&self.codec, body)?)
    }

    /// Decode a stored body by name alone, ignoring the stored version.
    ///
    /// Only meaningful for registries that keep a single version per
    /// name, such as the no-version strategy.
    ///
    /// # Errors
    ///
    /// Returns [`MappingError::UnknownName`] for unknown names and
    /// [`MappingError::AmbiguousName`] when several versions share the
    /// name.
    pub fn decode_by_name(
        &self,
        body: &serde_json::Value,
        name: &str,
    ) -> Result<E, VersioningError> {
        let mapping = match self.bare_names.get(name) {
            Some(Bare::Unique(mapping)) => mapping,
            Some(Bare::Ambiguous) => {
                return Err(MappingError::AmbiguousName {
                    name: name.to_owned(),
                }
                .into())
            }
            None => {
                return Err(MappingError::UnknownName {
                    name: name.to_owned(),
                }
                .into());
            }
        };
        let entry = &self.decoders[mapping];
        Ok((entry.decode)(&self.codec, body)?)
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;
    use uuid::Uuid;

    use super::*;

    #[derive(Clone, Debug, PartialEq, serde::Serialize, Deserialize)]
    struct CounterIncremented {
        event_id: Uuid,
        counter_id: Uuid,
        by: i64,
    }

    #[derive(Clone, Debug, PartialEq, serde::Serialize, Deserialize)]
    struct CounterReset {
        event_id: Uuid,
        counter_id: Uuid,
    }

    #[derive(Clone, Debug, PartialEq)]
    enum CounterEvent {
        Incremented(CounterIncremented),
        Reset(CounterReset),
    }

    impl From<CounterIncremented> for CounterEvent {
        fn from(e: CounterIncremented) -> Self {
            Self::Incremented(e)
        }
    }

    impl From<CounterReset> for CounterEvent {
        fn from(e: CounterReset) -> Self {
            Self::Reset(e)
        }
    }

    impl Event for CounterEvent {
        fn event_id(&self) -> Uuid {
            match self {
                Self::Incremented(e) => e.event_id,
                Self::Reset(e) => e.event_id,
            }
        }

        fn aggregate_id(&self) -> Uuid {
            match self {
                Self::Incremented(e) => e.counter_id,
                Self::Reset(e) => e.counter_id,
            }
        }

        fn type_tag(&self) -> TypeTag {
            match self {
                Self::Incremented(_) => TypeTag::of::<CounterIncremented>(),
                Self::Reset(_) => TypeTag::of::<CounterReset>(),
            }
        }
    }

    fn registered_map() -> EventTypeMap<CounterEvent> {
        let mut map = EventTypeMap::new();
        map.register::<CounterIncremented, _>("CounterIncremented", 1, |e| match e {
            CounterEvent::Incremented(inner) => Some(inner),
            CounterEvent::Reset(_) => None,
        })
        .unwrap();
        map.register::<CounterReset, _>("CounterReset", 1, |e| match e {
            CounterEvent::Reset(inner) => Some(inner),
            CounterEvent::Incremented(_) => None,
        })
        .unwrap();
        map
    }

    fn incremented() -> CounterEvent {
        CounterEvent::Incremented(CounterIncremented {
            event_id: Uuid::new_v4(),
            counter_id: Uuid::new_v4(),
            by: 3,
        })
    }

    #[test]
    fn roundtrips_registered_event() {
        let map = registered_map();
        let event = incremented();

        let body = map.encode(&event).unwrap();
        let decoded = map.decode(&body, "CounterIncremented", 1).unwrap();

        assert_eq!(decoded, event);
    }

    #[test]
    fn new_needs_no_codec_annotation() {
        // The codec parameter must not leak into construction; only
        // the event type is named, and only via the registration.
        let mut map = EventTypeMap::new();
        map.register::<CounterIncremented, _>("CounterIncremented", 1, |e| match e {
            CounterEvent::Incremented(inner) => Some(inner),
            CounterEvent::Reset(_) => None,
        })
        .unwrap();

        let event = incremented();
        let body = map.encode(&event).unwrap();
        assert_eq!(map.decode(&body, "CounterIncremented", 1).unwrap(), event);
    }

    #[test]
    fn name_and_version_resolves_by_tag() {
        let map = registered_map();
        let mapping = map
            .name_and_version(TypeTag::of::<CounterReset>())
            .unwrap();
        assert_eq!(mapping, NameAndVersion::new("CounterReset", 1));
    }

    #[test]
    fn lookup_of_unregistered_type_fails() {
        let map: EventTypeMap<CounterEvent> = EventTypeMap::new();
        let error = map
            .name_and_version(TypeTag::of::<CounterIncremented>())
            .unwrap_err();
        assert!(matches!(error, MappingError::TypeNotFound(_)));
    }

    #[test]
    fn decode_of_unregistered_name_fails() {
        let map = registered_map();
        let body = serde_json::json!({});
        let error = map.decode(&body, "NeverRegistered", 1).unwrap_err();
        assert!(matches!(
            error,
            VersioningError::Mapping(MappingError::NameNotFound(_))
        ));
    }

    #[test]
    fn duplicate_name_registration_fails() {
        let mut map = registered_map();
        let error = map
            .register::<CounterReset, _>("CounterIncremented", 1, |_| None)
            .unwrap_err();
        assert!(matches!(error, MappingError::NonUniqueName { .. }));
    }

    #[test]
    fn duplicate_type_registration_fails() {
        let mut map = registered_map();
        let error = map
            .register::<CounterIncremented, _>("RenamedIncrement", 2, |_| None)
            .unwrap_err();
        assert!(matches!(error, MappingError::NonUniqueType { .. }));
    }

    #[test]
    fn decode_by_name_ignores_stored_version() {
        let map = registered_map();
        let event = incremented();
        let body = map.encode(&event).unwrap();

        let decoded = map.decode_by_name(&body, "CounterIncremented").unwrap();
        assert_eq!(decoded, event);
    }

    #[test]
    fn decode_by_name_reports_only_the_name_for_unknown_names() {
        let map = registered_map();
        let error = map
            .decode_by_name(&serde_json::json!({}), "NeverRegistered")
            .unwrap_err();
        match error {
            VersioningError::Mapping(MappingError::UnknownName { name }) => {
                assert_eq!(name, "NeverRegistered");
            }
            other => panic!("expected an unknown-name error, got {other}"),
        }
    }

    #[test]
    fn decode_by_name_rejects_ambiguous_names() {
        let mut map = registered_map();
        map.register_decoder::<CounterIncremented, _>("CounterIncremented", 2, |e| {
            CounterEvent::Incremented(e)
        })
        .unwrap();

        let body = serde_json::json!({});
        let error = map.decode_by_name(&body, "CounterIncremented").unwrap_err();
        assert!(matches!(
            error,
            VersioningError::Mapping(MappingError::AmbiguousName { .. })
        ));
    }

    #[test]
    fn malformed_body_surfaces_codec_error() {
        let map = registered_map();
        let body = serde_json::json!({ "event_id": "not-a-uuid" });
        let error = map.decode(&body, "CounterIncremented", 1).unwrap_err();
        assert!(matches!(error, VersioningError::Body(_)));
    }
}
