use std::collections::BTreeMap;
use std::iter::FromIterator;

use morph_core::errors::{ErrorInfo, MorphError};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};

fn serde_error(code: &str, err: impl ToString) -> MorphError {
    MorphError::Serde(ErrorInfo::new(code, err.to_string()))
}

fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let ordered = map
                .into_iter()
                .map(|(key, value)| (key, canonicalize(value)))
                .collect::<BTreeMap<_, _>>();
            Value::Object(Map::from_iter(ordered))
        }
        Value::Array(values) => {
            let canonical_values = values.into_iter().map(canonicalize).collect();
            Value::Array(canonical_values)
        }
        other => other,
    }
}

/// Serializes a value into canonical JSON bytes with deterministic key ordering.
pub fn to_canonical_json_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, MorphError> {
    let value = serde_json::to_value(value).map_err(|err| serde_error("json-serialize", err))?;
    let canonical = canonicalize(value);
    let mut bytes = Vec::new();
    serde_json::to_writer(&mut bytes, &canonical).map_err(|err| serde_error("json-write", err))?;
    Ok(bytes)
}

/// Serializes a value into human readable JSON.
pub fn to_pretty_json<T: Serialize>(value: &T) -> Result<String, MorphError> {
    serde_json::to_string_pretty(value).map_err(|err| serde_error("json-serialize", err))
}

/// Deserializes a value from JSON bytes.
pub fn from_json_slice<T: DeserializeOwned>(data: &[u8]) -> Result<T, MorphError> {
    serde_json::from_slice(data).map_err(|err| serde_error("json-deserialize", err))
}

/// Serializes a value into deterministic YAML.
pub fn to_yaml_string<T: Serialize>(value: &T) -> Result<String, MorphError> {
    serde_yaml::to_string(value).map_err(|err| serde_error("yaml-serialize", err))
}

/// Deserializes a YAML payload into the requested type.
pub fn from_yaml_slice<T: DeserializeOwned>(data: &[u8]) -> Result<T, MorphError> {
    serde_yaml::from_slice(data).map_err(|err| serde_error("yaml-deserialize", err))
}
