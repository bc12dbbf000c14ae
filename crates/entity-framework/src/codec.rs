//! # State Codecs
//!
//! A [`Codec`] turns entity state into the opaque bytes a [`Store`](crate::store::Store)
//! holds, and back. The runtime does not care which format is used; [`JsonCodec`] is the
//! default and works for any serde type. Another format is plugged in per entity type
//! with [`EntityRuntime::register_with_codec`](crate::EntityRuntime::register_with_codec).

use crate::error::CodecError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;

/// Serializes and deserializes values of type `S`.
pub trait Codec<S>: Send + Sync + 'static {
    fn encode(&self, value: &S) -> Result<Vec<u8>, CodecError>;
    fn decode(&self, bytes: &[u8]) -> Result<S, CodecError>;
}

/// JSON codec backed by `serde_json`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl<S> Codec<S> for JsonCodec
where
    S: Serialize + DeserializeOwned,
{
    fn encode(&self, value: &S) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(value).map_err(|e| CodecError(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> Result<S, CodecError> {
        serde_json::from_slice(bytes).map_err(|e| CodecError(e.to_string()))
    }
}

/// Lets a shared, type-erased codec stand in wherever a codec is expected.
impl<S, C> Codec<S> for Arc<C>
where
    C: Codec<S> + ?Sized,
{
    fn encode(&self, value: &S) -> Result<Vec<u8>, CodecError> {
        (**self).encode(value)
    }

    fn decode(&self, bytes: &[u8]) -> Result<S, CodecError> {
        (**self).decode(bytes)
    }
}
