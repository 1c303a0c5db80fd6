//! Request key derivation
//!
//! A [`RequestKey`] is the SHA-256 digest of
//! `enc(method) | enc(url) | enc(canonical headers) | enc(canonical body)`,
//! where `enc` is form encoding. Encoding each element before joining keeps a
//! literal `|` inside one field from being read as a field boundary.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use url::form_urlencoded;

use crate::canonical::canonicalize;

/// Deterministic fingerprint identifying a request's cache slot
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestKey(String);

impl RequestKey {
    /// Wrap an already computed key (custom key functions, deserialized state)
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Get the key string
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RequestKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

type KeyFnInner = dyn Fn(&str, &str, &Value, &Value) -> RequestKey + Send + Sync;

/// Custom key function: `(method, url, headers, body) -> key`
///
/// Used when two requests are the same cache slot despite differing in a
/// field that carries no identity, such as a telemetry header. Two `KeyFn`s
/// are equal only when they share the same closure.
#[derive(Clone)]
pub struct KeyFn(Arc<KeyFnInner>);

impl KeyFn {
    /// Wrap a key closure
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&str, &str, &Value, &Value) -> RequestKey + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    /// Compute the key for a request shape
    #[must_use]
    pub fn derive(&self, method: &str, url: &str, headers: &Value, body: &Value) -> RequestKey {
        (self.0)(method, url, headers, body)
    }
}

impl fmt::Debug for KeyFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("KeyFn(..)")
    }
}

impl PartialEq for KeyFn {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// Derive the default request key
#[must_use]
pub fn derive_key(method: &str, url: &str, headers: &Value, body: &Value) -> RequestKey {
    let fields = [
        method.to_string(),
        url.to_string(),
        canonicalize(headers),
        canonicalize(body),
    ];

    let joined = fields
        .iter()
        .map(|field| form_urlencoded::byte_serialize(field.as_bytes()).collect::<String>())
        .collect::<Vec<_>>()
        .join("|");

    let mut hasher = Sha256::new();
    hasher.update(joined.as_bytes());
    let digest = hasher.finalize();
    RequestKey(format!("{digest:x}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const URL: &str = "http://api.example.com/users";

    #[test]
    fn test_key_is_sha256_hex() {
        let key = derive_key("GET", URL, &Value::Null, &Value::Null);
        assert_eq!(key.as_str().len(), 64);
        assert!(key.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_key_deterministic_across_key_order() {
        let a = derive_key(
            "POST",
            URL,
            &json!({"Accept": "application/json", "X-Tenant": "acme"}),
            &json!({"name": "Alice", "roles": {"admin": false, "dev": true}}),
        );
        let b = derive_key(
            "POST",
            URL,
            &json!({"X-Tenant": "acme", "Accept": "application/json"}),
            &json!({"roles": {"dev": true, "admin": false}, "name": "Alice"}),
        );
        assert_eq!(a, b);
    }

    #[test]
    fn test_each_field_changes_key() {
        let base = derive_key("GET", URL, &json!({"a": "1"}), &json!({"b": "2"}));

        assert_ne!(base, derive_key("POST", URL, &json!({"a": "1"}), &json!({"b": "2"})));
        assert_ne!(
            base,
            derive_key("GET", "http://api.example.com/teams", &json!({"a": "1"}), &json!({"b": "2"}))
        );
        assert_ne!(base, derive_key("GET", URL, &json!({"a": "9"}), &json!({"b": "2"})));
        assert_ne!(base, derive_key("GET", URL, &json!({"a": "1"}), &json!({"b": "9"})));
    }

    #[test]
    fn test_json_type_of_value_changes_key() {
        let key = |headers: Value, body: Value| derive_key("POST", URL, &headers, &body);

        assert_ne!(key(json!({"a": 1}), Value::Null), key(json!({"a": "1"}), Value::Null));
        assert_ne!(key(Value::Null, json!({"a": null})), key(Value::Null, json!({"a": ""})));
        assert_ne!(key(Value::Null, json!({"n": 2})), key(Value::Null, json!({"n": 2.5})));
        assert_ne!(key(Value::Null, json!({"ok": false})), key(Value::Null, json!({"ok": "false"})));
    }

    #[test]
    fn test_delimiter_inside_field_does_not_collide() {
        // Joined unencoded, both would read "GET|a||"
        let a = derive_key("GET|a", "", &Value::Null, &Value::Null);
        let b = derive_key("GET", "a", &Value::Null, &Value::Null);
        assert_ne!(a, b);
    }

    #[test]
    fn test_custom_key_fn_ignores_telemetry_header() {
        let key_fn = KeyFn::new(|method, url, headers, body| {
            let mut headers = headers.clone();
            if let Some(map) = headers.as_object_mut() {
                map.remove("X-Trace-Id");
            }
            derive_key(method, url, &headers, body)
        });

        let a = key_fn.derive("GET", URL, &json!({"X-Trace-Id": "1"}), &Value::Null);
        let b = key_fn.derive("GET", URL, &json!({"X-Trace-Id": "2"}), &Value::Null);
        assert_eq!(a, b);
        assert_eq!(key_fn, key_fn.clone());
        assert_ne!(key_fn, KeyFn::new(|_, _, _, _| RequestKey::new("fixed")));
    }

    #[test]
    fn test_display_matches_as_str() {
        let key = RequestKey::new("abc");
        assert_eq!(key.to_string(), "abc");
        assert_eq!(RequestKey::from("abc"), key);
    }
}
