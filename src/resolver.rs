//! Resolver: answering a definition from a cache snapshot
//!
//! A request is a miss when the ledger has no entry for it, the entry has no
//! value for the schema's entity type, or the entry was invalidated. A hit
//! joins the recorded ids against the live entity store, so an entity updated
//! through one request is seen by every other request that references it.

use serde::Serialize;
use serde_json::Value;

use crate::definition::ResourceDefinition;
use crate::merge::as_id_list;
use crate::store::{CacheState, FetchFailure, RequestMeta, entity_id_key};

/// Outcome of resolving a definition
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Resolution {
    /// Cached data is available
    Hit {
        /// Ledger metadata of the request
        meta: RequestMeta,
        /// Reconstructed value
        value: Value,
    },
    /// Nothing usable is cached
    Miss {
        /// Ledger metadata, when the request is known
        meta: Option<RequestMeta>,
        /// The definition's default value
        value: Value,
    },
}

impl Resolution {
    /// Whether cached data was found
    #[must_use]
    pub fn is_hit(&self) -> bool {
        matches!(self, Self::Hit { .. })
    }

    /// Resolved value (the default value on a miss)
    #[must_use]
    pub fn value(&self) -> &Value {
        match self {
            Self::Hit { value, .. } | Self::Miss { value, .. } => value,
        }
    }

    /// Consume into the resolved value
    #[must_use]
    pub fn into_value(self) -> Value {
        match self {
            Self::Hit { value, .. } | Self::Miss { value, .. } => value,
        }
    }

    /// Ledger metadata, if the request is known
    #[must_use]
    pub fn meta(&self) -> Option<&RequestMeta> {
        match self {
            Self::Hit { meta, .. } => Some(meta),
            Self::Miss { meta, .. } => meta.as_ref(),
        }
    }

    /// A fetch for this request is in flight
    #[must_use]
    pub fn is_fetching(&self) -> bool {
        self.meta().is_some_and(|meta| meta.is_fetching)
    }

    /// Failure of the last fetch
    #[must_use]
    pub fn error(&self) -> Option<&FetchFailure> {
        self.meta().and_then(|meta| meta.error.as_ref())
    }

    /// Whether the surrounding layer should start an automatic fetch.
    ///
    /// A failed request is not retried automatically until it is invalidated.
    #[must_use]
    pub fn needs_fetch(&self, definition: &ResourceDefinition) -> bool {
        if !definition.auto || self.is_hit() || self.is_fetching() {
            return false;
        }
        match self.meta() {
            Some(meta) => meta.error.is_none() || meta.did_invalidate,
            None => true,
        }
    }
}

/// Resolve `definition` against `state`
#[must_use]
pub fn resolve(state: &CacheState, definition: &ResourceDefinition) -> Resolution {
    let miss = |meta: Option<&RequestMeta>| Resolution::Miss {
        meta: meta.cloned(),
        value: definition.default_value.clone(),
    };

    let Some(entry) = state.entry(&definition.request_key) else {
        return miss(None);
    };
    if entry.meta.did_invalidate {
        return miss(Some(&entry.meta));
    }
    let entity_type = definition.entity_type();
    let Some(recorded) = entry.data_for(entity_type) else {
        return miss(Some(&entry.meta));
    };

    let joined = match state.entities.bucket(entity_type) {
        Some(bucket) if holds_ids(recorded) => Value::Array(
            as_id_list(recorded)
                .iter()
                .filter_map(|id| entity_id_key(id).and_then(|key| bucket.get(&key)))
                .cloned()
                .collect(),
        ),
        // unnormalized payload: the recorded value is the data itself
        _ => recorded.clone(),
    };

    let value = shape(joined, definition.is_array);
    Resolution::Hit {
        meta: entry.meta.clone(),
        value: if is_empty(&value) {
            definition.default_value.clone()
        } else {
            value
        },
    }
}

/// Whether a recorded ledger value is an id or a list of ids
fn holds_ids(recorded: &Value) -> bool {
    match recorded {
        Value::Array(items) => items.iter().all(|id| entity_id_key(id).is_some()),
        other => entity_id_key(other).is_some(),
    }
}

/// Singular schemas take the first element of the resolved collection
fn shape(value: Value, is_array: bool) -> Value {
    match value {
        Value::Array(items) if !is_array => items.into_iter().next().unwrap_or(Value::Null),
        other => other,
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Array(items) => items.is_empty(),
        Value::Object(fields) => fields.is_empty(),
        _ => false,
    }
}
