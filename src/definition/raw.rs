//! User-authored resource declarations
//!
//! Every field is optional so a declaration can be layered over a base
//! declaration (`extends`). Layering is shallow, like object spread: a field
//! set on the upper layer replaces the whole field of the lower layer.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use super::Schema;
use crate::key::KeyFn;
use crate::merge::UpdateStrategy;

type TransformInner = dyn Fn(&Value) -> Value + Send + Sync;

/// Response transform applied before payload normalization
#[derive(Clone)]
pub struct TransformFn(Arc<TransformInner>);

impl TransformFn {
    /// Wrap a transform closure
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&Value) -> Value + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    /// Apply the transform
    #[must_use]
    pub fn apply(&self, response: &Value) -> Value {
        (self.0)(response)
    }
}

impl fmt::Debug for TransformFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TransformFn(..)")
    }
}

impl PartialEq for TransformFn {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// When a finished mutation invalidates its source resource
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RefetchAfter {
    /// Never (`false`)
    #[default]
    Never,
    /// After success or error (`true`)
    Always,
    /// Only after a successful response
    Success,
    /// Only after a failed response
    Error,
}

impl RefetchAfter {
    /// Whether a completion with the given outcome invalidates the source
    #[must_use]
    pub fn triggers(self, succeeded: bool) -> bool {
        match self {
            Self::Never => false,
            Self::Always => true,
            Self::Success => succeeded,
            Self::Error => !succeeded,
        }
    }
}

impl Serialize for RefetchAfter {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Self::Never => serializer.serialize_bool(false),
            Self::Always => serializer.serialize_bool(true),
            Self::Success => serializer.serialize_str("success"),
            Self::Error => serializer.serialize_str("error"),
        }
    }
}

impl<'de> Deserialize<'de> for RefetchAfter {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Flag(bool),
            Name(String),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Flag(true) => Ok(Self::Always),
            Repr::Flag(false) => Ok(Self::Never),
            Repr::Name(name) => match name.as_str() {
                "success" => Ok(Self::Success),
                "error" => Ok(Self::Error),
                "always" => Ok(Self::Always),
                "never" => Ok(Self::Never),
                other => Err(serde::de::Error::custom(format!(
                    "refetch_after must be true, false, 'success' or 'error', got '{other}'"
                ))),
            },
        }
    }
}

/// Resource declaration as written by the user
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawResourceDefinition {
    /// Entity schema (mandatory after resolving `extends`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<Schema>,
    /// Endpoint URL, without query string
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// HTTP method (default `GET`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    /// Request headers
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headers: Option<Map<String, Value>>,
    /// Request body
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    /// Query parameters
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Map<String, Value>>,
    /// Fetch automatically when a view needs the resource (default: GET only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto: Option<bool>,
    /// Keep the response in the cache (default: GET only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store: Option<bool>,
    /// Never fetched during server rendering
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_only: Option<bool>,
    /// Value served while nothing is cached
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,
    /// Merge strategy for incoming ids
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update_strategy: Option<UpdateStrategy>,
    /// Invalidate the source resource after this mutation finishes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refetch_after: Option<RefetchAfter>,
    /// Named mutations of this resource
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actions: Option<BTreeMap<String, RawResourceDefinition>>,
    /// Base declaration this one overrides
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extends: Option<Box<RawResourceDefinition>>,
    /// Custom request key function
    #[serde(skip)]
    pub key_fn: Option<KeyFn>,
    /// Response transform
    #[serde(skip)]
    pub transform: Option<TransformFn>,
}

impl RawResourceDefinition {
    /// Declaration for `url`
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Self::default()
        }
    }

    /// Set the schema
    #[must_use]
    pub fn with_schema(mut self, schema: impl Into<Schema>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    /// Set the HTTP method
    #[must_use]
    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    /// Add one header
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.headers
            .get_or_insert_with(Map::new)
            .insert(name.into(), value.into());
        self
    }

    /// Set the request body
    #[must_use]
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Add one query parameter
    #[must_use]
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params
            .get_or_insert_with(Map::new)
            .insert(name.into(), value.into());
        self
    }

    /// Set `auto`
    #[must_use]
    pub fn with_auto(mut self, auto: bool) -> Self {
        self.auto = Some(auto);
        self
    }

    /// Set `store`
    #[must_use]
    pub fn with_store(mut self, store: bool) -> Self {
        self.store = Some(store);
        self
    }

    /// Set `client_only`
    #[must_use]
    pub fn with_client_only(mut self, client_only: bool) -> Self {
        self.client_only = Some(client_only);
        self
    }

    /// Set the default value
    #[must_use]
    pub fn with_default_value(mut self, value: Value) -> Self {
        self.default_value = Some(value);
        self
    }

    /// Set the merge strategy
    #[must_use]
    pub fn with_update_strategy(mut self, strategy: UpdateStrategy) -> Self {
        self.update_strategy = Some(strategy);
        self
    }

    /// Set the refetch policy
    #[must_use]
    pub fn with_refetch_after(mut self, refetch_after: RefetchAfter) -> Self {
        self.refetch_after = Some(refetch_after);
        self
    }

    /// Declare a named action
    #[must_use]
    pub fn with_action(mut self, name: impl Into<String>, action: RawResourceDefinition) -> Self {
        self.actions
            .get_or_insert_with(BTreeMap::new)
            .insert(name.into(), action);
        self
    }

    /// Layer this declaration over `base`
    #[must_use]
    pub fn extending(mut self, base: RawResourceDefinition) -> Self {
        self.extends = Some(Box::new(base));
        self
    }

    /// Use a custom request key function
    #[must_use]
    pub fn with_key_fn(mut self, key_fn: KeyFn) -> Self {
        self.key_fn = Some(key_fn);
        self
    }

    /// Transform responses before normalization
    #[must_use]
    pub fn with_transform<F>(mut self, f: F) -> Self
    where
        F: Fn(&Value) -> Value + Send + Sync + 'static,
    {
        self.transform = Some(TransformFn::new(f));
        self
    }

    /// Fields set here win; unset fields fall back to `base`.
    #[must_use]
    pub fn layered_over(self, base: RawResourceDefinition) -> Self {
        Self {
            schema: self.schema.or(base.schema),
            url: self.url.or(base.url),
            method: self.method.or(base.method),
            headers: self.headers.or(base.headers),
            body: self.body.or(base.body),
            params: self.params.or(base.params),
            auto: self.auto.or(base.auto),
            store: self.store.or(base.store),
            client_only: self.client_only.or(base.client_only),
            default_value: self.default_value.or(base.default_value),
            update_strategy: self.update_strategy.or(base.update_strategy),
            refetch_after: self.refetch_after.or(base.refetch_after),
            actions: self.actions.or(base.actions),
            extends: None,
            key_fn: self.key_fn.or(base.key_fn),
            transform: self.transform.or(base.transform),
        }
    }

    /// Resolve the whole `extends` chain into one layer
    #[must_use]
    pub fn flatten_extends(mut self) -> Self {
        match self.extends.take() {
            Some(base) => self.layered_over(base.flatten_extends()),
            None => self,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_refetch_after_parsing() {
        let parse = |s: &str| serde_yaml::from_str::<RefetchAfter>(s).unwrap();
        assert_eq!(parse("true"), RefetchAfter::Always);
        assert_eq!(parse("false"), RefetchAfter::Never);
        assert_eq!(parse("success"), RefetchAfter::Success);
        assert_eq!(parse("error"), RefetchAfter::Error);
        assert!(serde_yaml::from_str::<RefetchAfter>("sometimes").is_err());
    }

    #[test]
    fn test_refetch_after_triggers() {
        assert!(RefetchAfter::Always.triggers(true));
        assert!(RefetchAfter::Always.triggers(false));
        assert!(RefetchAfter::Success.triggers(true));
        assert!(!RefetchAfter::Success.triggers(false));
        assert!(RefetchAfter::Error.triggers(false));
        assert!(!RefetchAfter::Never.triggers(true));
    }

    #[test]
    fn test_layering_is_shallow() {
        let base = RawResourceDefinition::new("http://a/users")
            .with_schema("user")
            .with_header("Accept", "application/json")
            .with_header("X-Tenant", "acme");
        let child = RawResourceDefinition::default()
            .with_method("POST")
            .with_header("X-Tenant", "other");

        let merged = child.layered_over(base);
        assert_eq!(merged.url.as_deref(), Some("http://a/users"));
        assert_eq!(merged.method.as_deref(), Some("POST"));
        // headers replaced wholesale, not merged key by key
        assert_eq!(merged.headers.unwrap(), json!({"X-Tenant": "other"}).as_object().unwrap().clone());
    }

    #[test]
    fn test_flatten_multi_level_chain() {
        let root = RawResourceDefinition::new("http://a/root")
            .with_schema("thing")
            .with_auto(false);
        let middle = RawResourceDefinition::new("http://a/middle").extending(root);
        let leaf = RawResourceDefinition::default()
            .with_method("put")
            .extending(middle);

        let flat = leaf.flatten_extends();
        assert!(flat.extends.is_none());
        assert_eq!(flat.url.as_deref(), Some("http://a/middle"));
        assert_eq!(flat.schema, Some(Schema::entity("thing")));
        assert_eq!(flat.auto, Some(false));
        assert_eq!(flat.method.as_deref(), Some("put"));
    }

    #[test]
    fn test_yaml_declaration() {
        let yaml = r"
url: http://api.example.com/users
schema:
  items: user
params:
  page: 1
actions:
  remove:
    method: DELETE
    update_strategy: remove
    refetch_after: success
";
        let raw: RawResourceDefinition = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(raw.schema, Some(Schema::collection("user")));
        assert_eq!(raw.params.unwrap()["page"], json!(1));
        let actions = raw.actions.unwrap();
        let remove = &actions["remove"];
        assert_eq!(remove.method.as_deref(), Some("DELETE"));
        assert_eq!(remove.update_strategy, Some(UpdateStrategy::Remove));
        assert_eq!(remove.refetch_after, Some(RefetchAfter::Success));
    }
}
