// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Wire Codec
//!
//! This module provides the serialization seam between typed messages and
//! the bytes carried by the broker. The JSON codec writes camel-cased,
//! pretty-printed documents (message types are expected to derive serde with
//! `rename_all = "camelCase"` and skip null-valued optionals) and reads
//! tolerantly: unknown fields are ignored, and object keys are matched
//! against the target's field names ignoring case and `-`/`_` separators, so
//! `simulateretry`, `SIMULATERETRY` and `Simulate_Retry` all bind to a field
//! named `simulateRetry`.

use crate::{errors::ConsumeError, naming};
use serde::{
    de::{
        value::{MapDeserializer, SeqDeserializer},
        DeserializeOwned, Deserializer, IntoDeserializer, Visitor,
    },
    forward_to_deserialize_any, Serialize,
};
use serde_json::Value;

/// Encodes and decodes message payloads for the wire.
pub trait Codec: Send + Sync {
    /// Serializes a message to wire bytes.
    fn encode<T: Serialize>(&self, message: &T) -> Result<Vec<u8>, serde_json::Error>;

    /// Deserializes wire bytes into a message.
    ///
    /// Returns `Ok(None)` when the payload is well-formed but carries
    /// nothing to dispatch (a JSON `null`); returns a decode failure when
    /// the payload does not parse at all.
    fn decode<T: DeserializeOwned>(&self, raw: &[u8]) -> Result<Option<T>, ConsumeError>;
}

/// JSON implementation of the wire codec.
#[derive(Debug, Clone, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode<T: Serialize>(&self, message: &T) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec_pretty(message)
    }

    fn decode<T: DeserializeOwned>(&self, raw: &[u8]) -> Result<Option<T>, ConsumeError> {
        let value: Value = serde_json::from_slice(raw)?;
        if value.is_null() {
            return Ok(None);
        }

        let typed = T::deserialize(KeyFoldDeserializer::new(value))?;
        Ok(Some(typed))
    }
}

/// Deserializes a JSON value while renaming object keys to the expected
/// field name whose folded form matches, recursively through nested structs,
/// sequences and options. Keys with no folded match pass through unchanged
/// and fall under the target's unknown-field handling.
struct KeyFoldDeserializer {
    value: Value,
}

impl KeyFoldDeserializer {
    fn new(value: Value) -> Self {
        KeyFoldDeserializer { value }
    }
}

impl<'de> IntoDeserializer<'de, serde_json::Error> for KeyFoldDeserializer {
    type Deserializer = Self;

    fn into_deserializer(self) -> Self {
        self
    }
}

impl<'de> Deserializer<'de> for KeyFoldDeserializer {
    type Error = serde_json::Error;

    fn deserialize_any<V>(self, visitor: V) -> Result<V::Value, Self::Error>
    where
        V: Visitor<'de>,
    {
        self.value.deserialize_any(visitor)
    }

    fn deserialize_option<V>(self, visitor: V) -> Result<V::Value, Self::Error>
    where
        V: Visitor<'de>,
    {
        match self.value {
            Value::Null => visitor.visit_none(),
            value => visitor.visit_some(KeyFoldDeserializer::new(value)),
        }
    }

    fn deserialize_seq<V>(self, visitor: V) -> Result<V::Value, Self::Error>
    where
        V: Visitor<'de>,
    {
        match self.value {
            Value::Array(items) => visitor.visit_seq(SeqDeserializer::new(
                items.into_iter().map(KeyFoldDeserializer::new),
            )),
            other => other.deserialize_any(visitor),
        }
    }

    fn deserialize_struct<V>(
        self,
        _name: &'static str,
        fields: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, Self::Error>
    where
        V: Visitor<'de>,
    {
        match self.value {
            Value::Object(map) => {
                let entries = map.into_iter().map(|(key, value)| {
                    let folded = naming::fold_key(&key);
                    let key = fields
                        .iter()
                        .find(|field| naming::fold_key(field) == folded)
                        .map_or(key, |field| (*field).to_owned());
                    (key, KeyFoldDeserializer::new(value))
                });
                visitor.visit_map(MapDeserializer::new(entries))
            }
            other => other.deserialize_any(visitor),
        }
    }

    forward_to_deserialize_any! {
        bool i8 i16 i32 i64 i128 u8 u16 u32 u64 u128 f32 f64 char str string
        bytes byte_buf unit unit_struct newtype_struct tuple tuple_struct map
        enum identifier ignored_any
    }
}
