//! Payload (de)serialization boundary.
//!
//! The store treats event payloads as opaque JSON; converting between
//! a typed payload and that JSON is the job of a [`BodyCodec`].
//! [`JsonCodec`] is the default, backed by `serde_json`. A codec must
//! fail loudly on malformed payloads, never silently drop fields.

use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

/// Error raised when a payload cannot be encoded or decoded.
///
/// Carries the Rust type involved so that the failing registration is
/// identifiable from the message alone.
#[derive(Debug, Error)]
pub enum BodyCodecError {
    /// Could not turn a typed payload into JSON.
    #[error("could not encode event of type {type_name} to json")]
    Encode {
        type_name: &'static str,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },
    /// Could not turn stored JSON back into a typed payload.
    #[error("could not decode event body into type {type_name}")]
    Decode {
        type_name: &'static str,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },
}

/// Converts between typed event payloads and their stored JSON bodies.
pub trait BodyCodec: Send + Sync + 'static {
    /// Encode a payload to a JSON body.
    ///
    /// # Errors
    ///
    /// Returns [`BodyCodecError::Encode`] when serialization fails.
    fn encode<T: Serialize>(&self, value: &T) -> Result<serde_json::Value, BodyCodecError>;

    /// Decode a stored JSON body into a payload.
    ///
    /// # Errors
    ///
    /// Returns [`BodyCodecError::Decode`] when the body does not match
    /// the payload shape.
    fn decode<T: DeserializeOwned>(&self, body: &serde_json::Value) -> Result<T, BodyCodecError>;
}

/// JSON codec backed by `serde_json`.
///
/// Unknown fields in stored bodies are ignored and missing fields fall
/// back to `#[serde(default)]` where declared, which is what makes the
/// no-version strategy backward and forward compatible.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonCodec;

impl BodyCodec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<serde_json::Value, BodyCodecError> {
        serde_json::to_value(value).map_err(|e| BodyCodecError::Encode {
            type_name: std::any::type_name::<T>(),
            source: Box::new(e),
        })
    }

    fn decode<T: DeserializeOwned>(&self, body: &serde_json::Value) -> Result<T, BodyCodecError> {
        serde_json::from_value(body.clone()).map_err(|e| BodyCodecError::Decode {
            type_name: std::any::type_name::<T>(),
            source: Box::new(e),
        })
    }
}
