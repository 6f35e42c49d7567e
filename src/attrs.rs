//! Typed attribute blobs.
//!
//! Specification data arrives from the legacy table as opaque JSON. It is
//! parsed into a tagged value type at the engine boundary so the merge with
//! size metadata is type-checked instead of being stringly JSON surgery.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A structured attribute value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Null,
    Bool(bool),
    Int(i64),
    Num(f64),
    Str(String),
    List(Vec<AttrValue>),
    Map(BTreeMap<String, AttrValue>),
}

pub type AttrMap = BTreeMap<String, AttrValue>;

#[derive(Debug, Error)]
pub enum AttrError {
    #[error("specification blob is not valid JSON: {0}")]
    Unparseable(#[from] serde_json::Error),
    #[error("specification blob is not a JSON object (found {0})")]
    NotAnObject(&'static str),
}

/// Parse a raw specification blob into an attribute map.
///
/// Accepts a JSON object directly, a JSON string containing an encoded
/// object (a shape the legacy admin UI produced), or null/absent for an
/// empty map. Anything else is a per-record mapping error.
pub fn parse_specification(blob: Option<&serde_json::Value>) -> Result<AttrMap, AttrError> {
    let value = match blob {
        None | Some(serde_json::Value::Null) => return Ok(AttrMap::new()),
        Some(serde_json::Value::String(encoded)) => serde_json::from_str(encoded)?,
        Some(other) => other.clone(),
    };

    match value {
        serde_json::Value::Object(_) => Ok(serde_json::from_value(value)?),
        serde_json::Value::Array(_) => Err(AttrError::NotAnObject("array")),
        serde_json::Value::String(_) => Err(AttrError::NotAnObject("string")),
        serde_json::Value::Number(_) => Err(AttrError::NotAnObject("number")),
        serde_json::Value::Bool(_) => Err(AttrError::NotAnObject("boolean")),
        serde_json::Value::Null => Ok(AttrMap::new()),
    }
}

/// Overlay size metadata onto a specification map.
///
/// Existing specification keys always survive; the dedicated `size_name`,
/// `size_value` and `dimensions` sub-keys are written on top.
pub fn merge_size_metadata(
    mut attributes: AttrMap,
    size_name: Option<&str>,
    size_value: Option<&str>,
    dimensions: Option<AttrMap>,
) -> AttrMap {
    if let Some(name) = size_name {
        attributes.insert("size_name".to_string(), AttrValue::Str(name.to_string()));
    }
    if let Some(value) = size_value {
        attributes.insert("size_value".to_string(), AttrValue::Str(value.to_string()));
    }
    if let Some(dims) = dimensions {
        if !dims.is_empty() {
            attributes.insert("dimensions".to_string(), AttrValue::Map(dims));
        }
    }
    attributes
}
