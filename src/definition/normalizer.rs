//! Resource definition normalizer
//!
//! Precedence, lowest to highest: built-in defaults, the `extends` chain, the
//! declaration itself. Everything the rest of the engine reads (canonical
//! URL, uppercase method, request key, array-ness, default value, auto/store
//! flags) is derived once here and frozen into a [`ResourceDefinition`].

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::debug;
use url::Url;

use super::raw::{RawResourceDefinition, RefetchAfter, TransformFn};
use super::schema::Schema;
use super::url::build_url;
use crate::error::DefinitionError;
use crate::key::{KeyFn, RequestKey, derive_key};
use crate::merge::UpdateStrategy;
use crate::{Error, Result};

const DEFAULT_METHOD: &str = "GET";

/// Normalized, immutable resource definition
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceDefinition {
    /// Entity schema
    pub schema: Schema,
    /// Absolute canonical URL including the canonical query string
    pub url: String,
    /// Canonical URL without query string
    pub endpoint: String,
    /// Uppercase HTTP method
    pub method: String,
    /// Request headers
    pub headers: Map<String, Value>,
    /// Request body (`null` when absent)
    pub body: Value,
    /// Query parameters
    pub params: Map<String, Value>,
    /// Fetch automatically when a view needs the resource
    pub auto: bool,
    /// Keep responses in the cache
    pub store: bool,
    /// Never fetched during server rendering
    pub client_only: bool,
    /// Value served while nothing is cached
    pub default_value: Value,
    /// Merge strategy for incoming ids
    pub update_strategy: UpdateStrategy,
    /// Invalidate the source resource after this mutation finishes
    pub refetch_after: RefetchAfter,
    /// Normalized actions, by name
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub actions: BTreeMap<String, ResourceDefinition>,
    /// Payload is a list of entities
    pub is_array: bool,
    /// Cache slot of this request
    pub request_key: RequestKey,
    /// Request key of the resource this action belongs to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<RequestKey>,
    #[serde(skip)]
    key_fn: Option<KeyFn>,
    #[serde(skip)]
    transform: Option<TransformFn>,
}

impl ResourceDefinition {
    /// Entity type key (storage bucket)
    #[must_use]
    pub fn entity_type(&self) -> &str {
        self.schema.key()
    }

    /// Normalized action by name
    pub fn action(&self, name: &str) -> Result<&ResourceDefinition> {
        self.actions.get(name).ok_or_else(|| Error::UnknownAction {
            action: name.to_string(),
            url: self.url.clone(),
        })
    }

    /// Run the response transform (identity when none is set)
    #[must_use]
    pub fn transform_response(&self, response: &Value) -> Value {
        match &self.transform {
            Some(transform) => transform.apply(response),
            None => response.clone(),
        }
    }

    /// Whether this is a mutation rather than a read
    #[must_use]
    pub fn is_mutation(&self) -> bool {
        self.method != DEFAULT_METHOD
    }

    /// Fully explicit declaration that normalizes back to this definition
    #[must_use]
    pub fn to_raw(&self) -> RawResourceDefinition {
        RawResourceDefinition {
            schema: Some(self.schema.clone()),
            url: Some(self.endpoint.clone()),
            method: Some(self.method.clone()),
            headers: Some(self.headers.clone()),
            body: Some(self.body.clone()),
            params: Some(self.params.clone()),
            auto: Some(self.auto),
            store: Some(self.store),
            client_only: Some(self.client_only),
            default_value: Some(self.default_value.clone()),
            update_strategy: Some(self.update_strategy.clone()),
            refetch_after: Some(self.refetch_after),
            actions: (!self.actions.is_empty()).then(|| {
                self.actions
                    .iter()
                    .map(|(name, action)| (name.clone(), action.to_raw()))
                    .collect()
            }),
            extends: None,
            key_fn: self.key_fn.clone(),
            transform: self.transform.clone(),
        }
    }
}

/// Normalizes raw declarations, optionally resolving relative URLs
#[derive(Debug, Clone, Default)]
pub struct Normalizer {
    base_url: Option<Url>,
}

impl Normalizer {
    /// Normalizer without a base URL; relative URLs are rejected
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve relative resource URLs against `base`
    pub fn with_base_url(base: &str) -> Result<Self> {
        let base_url = Url::parse(base).map_err(|e| DefinitionError::InvalidUrl {
            url: base.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            base_url: Some(base_url),
        })
    }

    /// Configured base URL
    #[must_use]
    pub fn base_url(&self) -> Option<&Url> {
        self.base_url.as_ref()
    }

    /// Normalize a raw declaration
    pub fn normalize(&self, raw: RawResourceDefinition) -> Result<ResourceDefinition> {
        self.normalize_layer(raw.flatten_extends(), None)
    }

    fn normalize_layer(
        &self,
        mut raw: RawResourceDefinition,
        source: Option<RequestKey>,
    ) -> Result<ResourceDefinition> {
        let raw_actions = raw.actions.take().unwrap_or_default();

        let schema = raw.schema.clone().ok_or_else(|| DefinitionError::MissingSchema {
            url: raw.url.clone().unwrap_or_else(|| "<unknown>".to_string()),
        })?;
        let declared_url = raw.url.as_deref().ok_or(DefinitionError::MissingUrl)?;
        let method = canonical_method(raw.method.as_deref().unwrap_or(DEFAULT_METHOD))?;

        let params = raw.params.clone().unwrap_or_default();
        let url = build_url(declared_url, &Value::Object(params.clone()), self.base_url())?;
        let headers = raw.headers.clone().unwrap_or_default();
        let body = raw.body.clone().unwrap_or(Value::Null);

        let headers_value = Value::Object(headers.clone());
        let request_key = match &raw.key_fn {
            Some(key_fn) => key_fn.derive(&method, &url.full, &headers_value, &body),
            None => derive_key(&method, &url.full, &headers_value, &body),
        };

        let is_get = method == DEFAULT_METHOD;
        let is_array = schema.is_array();
        let default_value = raw.default_value.clone().unwrap_or_else(|| {
            if is_array {
                Value::Array(Vec::new())
            } else {
                Value::Object(Map::new())
            }
        });
        let update_strategy = raw.update_strategy.clone().unwrap_or(if is_get {
            UpdateStrategy::Replace
        } else {
            UpdateStrategy::Ignore
        });

        let inherited = inheritable(&raw);
        let actions = raw_actions
            .into_iter()
            .map(|(name, action)| {
                let layered = action.flatten_extends().layered_over(inherited.clone());
                self.normalize_layer(layered, Some(request_key.clone()))
                    .map(|action| (name, action))
            })
            .collect::<Result<BTreeMap<_, _>>>()?;

        debug!(
            request_key = %request_key,
            method = %method,
            url = %url.full,
            actions = actions.len(),
            "Normalized resource definition"
        );

        Ok(ResourceDefinition {
            schema,
            url: url.full,
            endpoint: url.endpoint,
            method,
            headers,
            body,
            params,
            auto: raw.auto.unwrap_or(is_get),
            store: raw.store.unwrap_or(is_get),
            client_only: raw.client_only.unwrap_or(false),
            default_value,
            update_strategy,
            refetch_after: raw.refetch_after.unwrap_or_default(),
            actions,
            is_array,
            request_key,
            source,
            key_fn: raw.key_fn,
            transform: raw.transform,
        })
    }
}

/// Normalize with the default [`Normalizer`]
pub fn normalize(raw: RawResourceDefinition) -> Result<ResourceDefinition> {
    Normalizer::new().normalize(raw)
}

/// The part of a resource an action inherits: request shape and schema.
/// Method-dependent behaviour (auto, store, strategy, refetch) is re-derived
/// for the action's own method.
fn inheritable(parent: &RawResourceDefinition) -> RawResourceDefinition {
    RawResourceDefinition {
        auto: None,
        store: None,
        update_strategy: None,
        refetch_after: None,
        actions: None,
        extends: None,
        ..parent.clone()
    }
}

/// Uppercase the method and check it is an HTTP token
fn canonical_method(method: &str) -> std::result::Result<String, DefinitionError> {
    let method = method.trim().to_ascii_uppercase();
    let is_token = !method.is_empty()
        && method
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "!#$%&'*+-.^_`|~".contains(c));
    if is_token {
        Ok(method)
    } else {
        Err(DefinitionError::InvalidMethod(method))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::KeyFn;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn user() -> RawResourceDefinition {
        RawResourceDefinition::new("http://a/users/7").with_schema("user")
    }

    #[test]
    fn test_get_defaults() {
        let def = normalize(user()).unwrap();
        assert_eq!(def.method, "GET");
        assert!(def.auto);
        assert!(def.store);
        assert!(!def.client_only);
        assert!(!def.is_array);
        assert_eq!(def.default_value, json!({}));
        assert_eq!(def.update_strategy, UpdateStrategy::Replace);
        assert_eq!(def.refetch_after, RefetchAfter::Never);
        assert_eq!(def.url, "http://a/users/7");
        assert!(def.source.is_none());
    }

    #[test]
    fn test_mutation_defaults() {
        let def = normalize(user().with_method("post")).unwrap();
        assert_eq!(def.method, "POST");
        assert!(!def.auto);
        assert!(!def.store);
        assert_eq!(def.update_strategy, UpdateStrategy::Ignore);
        assert!(def.is_mutation());
    }

    #[test]
    fn test_collection_defaults_to_empty_list() {
        let def = normalize(
            RawResourceDefinition::new("http://a/users").with_schema(Schema::collection("user")),
        )
        .unwrap();
        assert!(def.is_array);
        assert_eq!(def.default_value, json!([]));
    }

    #[test]
    fn test_explicit_flags_win() {
        let def = normalize(
            user()
                .with_auto(false)
                .with_store(false)
                .with_client_only(true)
                .with_default_value(json!(null)),
        )
        .unwrap();
        assert!(!def.auto);
        assert!(!def.store);
        assert!(def.client_only);
        assert_eq!(def.default_value, json!(null));
    }

    #[test]
    fn test_missing_schema_is_fatal() {
        let err = normalize(RawResourceDefinition::new("http://a/users")).unwrap_err();
        assert!(matches!(
            err,
            Error::Definition(DefinitionError::MissingSchema { .. })
        ));
    }

    #[test]
    fn test_missing_url_is_fatal() {
        let raw = RawResourceDefinition::default().with_schema("user");
        assert!(matches!(
            normalize(raw).unwrap_err(),
            Error::Definition(DefinitionError::MissingUrl)
        ));
    }

    #[test]
    fn test_literal_query_string_is_fatal() {
        let raw = RawResourceDefinition::new("http://a/users?page=2").with_schema("user");
        assert!(matches!(
            normalize(raw).unwrap_err(),
            Error::Definition(DefinitionError::LiteralQueryString(_))
        ));
    }

    #[test]
    fn test_invalid_method_is_fatal() {
        assert!(matches!(
            normalize(user().with_method("GET ME")).unwrap_err(),
            Error::Definition(DefinitionError::InvalidMethod(_))
        ));
    }

    #[test]
    fn test_schema_from_extends() {
        let base = RawResourceDefinition::default()
            .with_schema("user")
            .with_header("Accept", "application/json");
        let def = normalize(RawResourceDefinition::new("http://a/users/7").extending(base)).unwrap();
        assert_eq!(def.entity_type(), "user");
        assert_eq!(def.headers["Accept"], json!("application/json"));
    }

    #[test]
    fn test_params_become_query_string() {
        let a = normalize(
            RawResourceDefinition::new("http://a/users/")
                .with_schema(Schema::collection("user"))
                .with_param("page", 2)
                .with_param("active", true),
        )
        .unwrap();
        let b = normalize(
            RawResourceDefinition::new("http://a/users")
                .with_schema(Schema::collection("user"))
                .with_param("active", true)
                .with_param("page", 2),
        )
        .unwrap();
        assert_eq!(a.url, "http://a/users?active=true&page=2");
        assert_eq!(a.endpoint, "http://a/users");
        assert_eq!(a.request_key, b.request_key);
    }

    #[test]
    fn test_relative_url_with_base() {
        let normalizer = Normalizer::with_base_url("https://api.example.com/").unwrap();
        let def = normalizer
            .normalize(RawResourceDefinition::new("/users/7").with_schema("user"))
            .unwrap();
        assert_eq!(def.url, "https://api.example.com/users/7");
    }

    #[test]
    fn test_custom_key_fn() {
        let key_fn = KeyFn::new(|method, url, _headers, _body| derive_key(method, url, &Value::Null, &Value::Null));
        let with_trace = normalize(
            user()
                .with_header("X-Trace-Id", "abc")
                .with_key_fn(key_fn.clone()),
        )
        .unwrap();
        let other_trace = normalize(user().with_header("X-Trace-Id", "def").with_key_fn(key_fn)).unwrap();
        assert_eq!(with_trace.request_key, other_trace.request_key);
    }

    #[test]
    fn test_actions_inherit_request_shape() {
        let def = normalize(
            user()
                .with_header("Authorization", "Bearer t")
                .with_update_strategy(UpdateStrategy::Append)
                .with_action(
                    "remove",
                    RawResourceDefinition::default()
                        .with_method("DELETE")
                        .with_refetch_after(RefetchAfter::Always),
                ),
        )
        .unwrap();

        let remove = def.action("remove").unwrap();
        assert_eq!(remove.method, "DELETE");
        assert_eq!(remove.url, def.url);
        assert_eq!(remove.headers["Authorization"], json!("Bearer t"));
        assert_eq!(remove.source.as_ref(), Some(&def.request_key));
        assert_ne!(remove.request_key, def.request_key);
        // method-dependent fields are not inherited
        assert_eq!(remove.update_strategy, UpdateStrategy::Ignore);
        assert!(!remove.auto);
        assert_eq!(remove.refetch_after, RefetchAfter::Always);
    }

    #[test]
    fn test_unknown_action() {
        let def = normalize(user()).unwrap();
        assert!(matches!(def.action("nope"), Err(Error::UnknownAction { .. })));
    }

    #[test]
    fn test_normalization_is_idempotent() {
        let raw = RawResourceDefinition::new("HTTP://A.example.com:80/users/")
            .with_schema(Schema::collection("user"))
            .with_method("get")
            .with_param("page", 1)
            .with_header("Accept", "application/json")
            .with_transform(|response| response.clone())
            .with_action(
                "create",
                RawResourceDefinition::default()
                    .with_method("post")
                    .with_body(json!({"name": "Alice"}))
                    .with_update_strategy(UpdateStrategy::Append),
            );

        let once = normalize(raw).unwrap();
        let twice = normalize(once.to_raw()).unwrap();
        assert_eq!(twice, once);
    }

    #[test]
    fn test_serializes_without_callbacks() {
        let def = normalize(user().with_transform(|v| v.clone())).unwrap();
        let json = serde_json::to_value(&def).unwrap();
        assert_eq!(json["method"], json!("GET"));
        assert_eq!(json["is_array"], json!(false));
        assert!(json.get("transform").is_none());
    }
}
