//! Order-independent canonical encoding of request parameters
//!
//! Headers, bodies and query parameters are arbitrary JSON objects whose key
//! order carries no meaning. Both encoders below sort keys at every nesting
//! level, so `{"b": 1, "a": {"y": 2, "x": 1}}` and
//! `{"a": {"x": 1, "y": 2}, "b": 1}` encode identically.
//!
//! [`canonicalize`] keeps JSON types apart (`1`, `"1"`, `null` and `""` all
//! differ) and feeds request keys. [`query_string`] writes scalars as plain
//! text, the way they travel in a URL.

use serde_json::{Map, Value};
use url::form_urlencoded;

/// Recursively rebuild `value` with object keys in ascending order.
#[must_use]
pub fn sort_keys(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));

            let mut sorted = Map::new();
            for (key, nested) in entries {
                sorted.insert(key.clone(), sort_keys(nested));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(sort_keys).collect()),
        other => other.clone(),
    }
}

/// Canonical encoding of a parameter object.
///
/// Every field value is written as sorted JSON text and form-encoded, so two
/// objects encode equally exactly when they are deeply equal. A top-level
/// `null` (no headers, no body) encodes as the empty string; any other
/// non-object value becomes a single token of its sorted JSON text.
#[must_use]
pub fn canonicalize(value: &Value) -> String {
    encode(value, |field| sort_keys(field).to_string())
}

/// Canonical query string for `params`.
///
/// Strings, numbers and booleans are written unquoted and `null` as an empty
/// value; compound values are sorted JSON text.
#[must_use]
pub fn query_string(params: &Value) -> String {
    encode(params, query_text)
}

fn encode(value: &Value, field_text: impl Fn(&Value) -> String) -> String {
    match value {
        Value::Null => String::new(),
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();

            let mut serializer = form_urlencoded::Serializer::new(String::new());
            for key in keys {
                serializer.append_pair(key, &field_text(&map[key.as_str()]));
            }
            serializer.finish()
        }
        other => form_urlencoded::byte_serialize(sort_keys(other).to_string().as_bytes()).collect(),
    }
}

fn query_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        compound @ (Value::Array(_) | Value::Object(_)) => sort_keys(compound).to_string(),
    }
}
