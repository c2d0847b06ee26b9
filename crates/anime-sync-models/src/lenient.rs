//! Tolerant deserializers for persisted state.
//!
//! Device storage and the cloud document were written by several versions of
//! the tracker; a wrong-shaped field (an object where an array was expected,
//! a garbage entry inside an otherwise fine map) resets to its default or is
//! dropped instead of failing the whole load.

use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::collections::BTreeMap;

pub fn map_or_default<'de, D, T>(deserializer: D) -> Result<BTreeMap<String, T>, D::Error>
where
    D: Deserializer<'de>,
    T: serde::de::DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Object(map) => map
            .into_iter()
            .filter_map(|(key, value)| serde_json::from_value(value).ok().map(|item| (key, item)))
            .collect(),
        _ => BTreeMap::new(),
    })
}

pub fn seq_or_default<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: serde::de::DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| serde_json::from_value(item).ok())
            .collect(),
        _ => Vec::new(),
    })
}
