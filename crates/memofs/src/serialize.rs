//! Stable text encoding of value graphs, and the cache file envelope built on top of it.
//!
//! The structural encoding is JSON. Functions never make it into the output, and a
//! [`SharedValue`](crate::SharedValue) that recurs along the path currently being visited is
//! omitted instead of being expanded again. The visited set is scoped to the current path, so a
//! node that is shared by two sibling branches is written out twice.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::value::Value;

/// Encodes a value into text.
pub type SerializeFn = Arc<dyn Fn(&Value) -> String + Send + Sync>;

/// Decodes the contents of a cache file back into the cached value.
pub type DeserializeFn = Arc<dyn Fn(&str) -> Result<Value, DecodeError> + Send + Sync>;

/// Cache file contents that could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed cache contents: {0}")]
pub struct DecodeError(pub String);

impl From<serde_json::Error> for DecodeError {
    fn from(err: serde_json::Error) -> Self {
        Self(err.to_string())
    }
}

/// A matching serializer / deserializer pair.
#[derive(Clone)]
pub struct Codec {
    pub(crate) serialize: SerializeFn,
    pub(crate) deserialize: DeserializeFn,
}

impl Codec {
    pub fn new(serialize: SerializeFn, deserialize: DeserializeFn) -> Self {
        Self {
            serialize,
            deserialize,
        }
    }

    pub fn serialize(&self, value: &Value) -> String {
        (self.serialize)(value)
    }

    pub fn deserialize(&self, text: &str) -> Result<Value, DecodeError> {
        (self.deserialize)(text)
    }

    /// Builds the envelope text that is written into a cache file.
    ///
    /// Objects and strings go through the serializer as `{"data": value}`. All other values are
    /// rendered verbatim into `{"data":<value>}`, which means that `NaN`, `Infinity` and
    /// `undefined` produce a file that fails to decode, and thus read back as
    /// [`Value::Undefined`].
    pub fn encode_envelope(&self, value: &Value) -> String {
        if value.is_object_or_string() {
            self.serialize(&Value::object([("data", value.clone())]))
        } else {
            format!("{{\"data\":{}}}", to_js_string(value))
        }
    }

    /// Decodes an envelope, degrading any decoding failure to [`Value::Undefined`].
    pub fn decode_envelope(&self, text: &str) -> Value {
        match self.deserialize(text) {
            Ok(value) => value,
            Err(err) => {
                tracing::trace!(
                    error = &err as &dyn std::error::Error,
                    "Discarding cache contents"
                );
                Value::Undefined
            }
        }
    }
}

impl Default for Codec {
    fn default() -> Self {
        Self {
            serialize: Arc::new(serialize),
            deserialize: Arc::new(deserialize),
        }
    }
}

impl fmt::Debug for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Codec").finish_non_exhaustive()
    }
}

/// Serializes a value graph into JSON.
///
/// A top-level value that is omitted entirely (a function, or `undefined`) is rendered as
/// `undefined`.
pub fn serialize(value: &Value) -> String {
    let mut seen = HashSet::new();
    match to_structural(value, &mut seen) {
        Some(json) => json.to_string(),
        None => "undefined".to_owned(),
    }
}

/// Parses a JSON envelope and returns its `data` member.
///
/// Documents that are not objects, or that have no `data` member, yield [`Value::Undefined`].
pub fn deserialize(text: &str) -> Result<Value, DecodeError> {
    let json: serde_json::Value = serde_json::from_str(text)?;
    Ok(match json {
        serde_json::Value::Object(mut map) => map.remove("data").map(from_json).unwrap_or_default(),
        _ => Value::Undefined,
    })
}

/// Converts a value into its JSON form, or `None` if it is omitted.
fn to_structural(value: &Value, seen: &mut HashSet<usize>) -> Option<serde_json::Value> {
    use serde_json::Value as Json;

    match value {
        Value::Undefined | Value::Function(_) => None,
        Value::Null => Some(Json::Null),
        Value::Bool(b) => Some(Json::Bool(*b)),
        Value::Number(n) => Some(number_to_json(*n)),
        Value::String(s) => Some(Json::String(s.clone())),
        Value::Array(items) => {
            let items = items
                .iter()
                .map(|item| to_structural(item, seen).unwrap_or(Json::Null))
                .collect();
            Some(Json::Array(items))
        }
        Value::Object(map) => {
            let map = map
                .iter()
                .filter_map(|(k, v)| Some((k.clone(), to_structural(v, seen)?)))
                .collect();
            Some(Json::Object(map))
        }
        Value::Shared(node) => {
            let identity = node.identity();
            if !seen.insert(identity) {
                return None;
            }
            let json = to_structural(&node.read(), seen);
            seen.remove(&identity);
            json
        }
    }
}

fn number_to_json(n: f64) -> serde_json::Value {
    const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

    if n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER {
        serde_json::Value::Number((n as i64).into())
    } else {
        serde_json::Number::from_f64(n)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null)
    }
}

fn from_json(json: serde_json::Value) -> Value {
    use serde_json::Value as Json;

    match json {
        Json::Null => Value::Null,
        Json::Bool(b) => Value::Bool(b),
        Json::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
        Json::String(s) => Value::String(s),
        Json::Array(items) => Value::Array(items.into_iter().map(from_json).collect()),
        Json::Object(map) => {
            Value::Object(map.into_iter().map(|(k, v)| (k, from_json(v))).collect())
        }
    }
}

/// Renders a number the way JavaScript's `String(number)` does.
pub(crate) fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_owned()
    } else if n.is_infinite() {
        let text = if n > 0.0 { "Infinity" } else { "-Infinity" };
        text.to_owned()
    } else if n.fract() == 0.0 && n.abs() < 1e21 {
        // also turns `-0` into `0`
        format!("{:.0}", n + 0.0)
    } else {
        match serde_json::Number::from_f64(n) {
            Some(number) => number.to_string(),
            None => n.to_string(),
        }
    }
}

/// The verbatim text form of a value.
pub(crate) fn to_js_string(value: &Value) -> String {
    match value {
        Value::Undefined => "undefined".to_owned(),
        Value::Null => "null".to_owned(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => format_number(*n),
        Value::String(s) => s.clone(),
        Value::Function(f) => f.source().to_owned(),
        Value::Array(_) | Value::Object(_) | Value::Shared(_) => serialize(value),
    }
}
