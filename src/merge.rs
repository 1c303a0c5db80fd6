//! Merge engine: folding incoming ids into a request's id list
//!
//! | strategy  | resulting id list                                     |
//! |-----------|-------------------------------------------------------|
//! | `replace` | incoming, as received                                 |
//! | `append`  | existing then incoming, duplicates dropped            |
//! | `prepend` | incoming then existing, duplicates dropped            |
//! | `remove`  | existing minus every incoming id                      |
//! | `none`    | untouched                                             |
//! | custom    | whatever the reducer returns (must be a list)         |
//!
//! Entities are written to the entity store regardless of strategy; the
//! strategy only governs which ids a specific request considers its own.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use tracing::debug;

use crate::key::RequestKey;
use crate::payload::MergeInstruction;
use crate::store::{CacheState, entity_id_key};
use crate::{Error, Result};

type ReducerFn = dyn Fn(&[Value], &[Value]) -> Value + Send + Sync;

/// Custom id-list reducer: `(incoming, existing) -> ids`
#[derive(Clone)]
pub struct CustomMerge(Arc<ReducerFn>);

impl CustomMerge {
    /// Wrap a reducer closure
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&[Value], &[Value]) -> Value + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }
}

impl fmt::Debug for CustomMerge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CustomMerge(..)")
    }
}

impl PartialEq for CustomMerge {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// Policy for reconciling a request's id list with newly arrived ids
#[derive(Debug, Clone, Default, PartialEq)]
pub enum UpdateStrategy {
    /// Overwrite the list
    #[default]
    Replace,
    /// Union, existing order first
    Append,
    /// Union, incoming order first
    Prepend,
    /// Drop incoming ids from the list
    Remove,
    /// Leave the list untouched (`false` / `none` in declarations)
    Ignore,
    /// Caller supplied reducer
    Custom(CustomMerge),
}

impl UpdateStrategy {
    /// Custom reducer strategy
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&[Value], &[Value]) -> Value + Send + Sync + 'static,
    {
        Self::Custom(CustomMerge::new(f))
    }

    /// Declaration name of the strategy
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Replace => "replace",
            Self::Append => "append",
            Self::Prepend => "prepend",
            Self::Remove => "remove",
            Self::Ignore => "none",
            Self::Custom(_) => "custom",
        }
    }
}

impl fmt::Display for UpdateStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for UpdateStrategy {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Self::Ignore => serializer.serialize_bool(false),
            other => serializer.serialize_str(other.as_str()),
        }
    }
}

impl<'de> Deserialize<'de> for UpdateStrategy {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
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
            Repr::Flag(false) => Ok(Self::Ignore),
            Repr::Flag(true) => Ok(Self::Replace),
            Repr::Name(name) => match name.to_ascii_lowercase().as_str() {
                "replace" => Ok(Self::Replace),
                "append" => Ok(Self::Append),
                "prepend" => Ok(Self::Prepend),
                "remove" => Ok(Self::Remove),
                "none" | "false" => Ok(Self::Ignore),
                other => Err(serde::de::Error::custom(format!(
                    "unknown update strategy '{other}' (custom reducers are set in code)"
                ))),
            },
        }
    }
}

/// View a ledger value as an id list: arrays as-is, `null` as empty, anything else as one id
#[must_use]
pub fn as_id_list(value: &Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items.clone(),
        Value::Null => Vec::new(),
        other => vec![other.clone()],
    }
}

fn identity(id: &Value) -> String {
    entity_id_key(id).unwrap_or_else(|| id.to_string())
}

fn dedup_keep_first(ids: impl IntoIterator<Item = Value>) -> Vec<Value> {
    let mut seen = HashSet::new();
    ids.into_iter()
        .filter(|id| seen.insert(identity(id)))
        .collect()
}

/// Apply a strategy to an id list.
///
/// Returns `Ok(None)` for [`UpdateStrategy::Ignore`].
pub fn merge_ids(
    strategy: &UpdateStrategy,
    existing: &[Value],
    incoming: &[Value],
    entity_type: &str,
) -> Result<Option<Vec<Value>>> {
    let merged = match strategy {
        UpdateStrategy::Ignore => return Ok(None),
        UpdateStrategy::Replace => incoming.to_vec(),
        UpdateStrategy::Append => dedup_keep_first(existing.iter().chain(incoming).cloned()),
        UpdateStrategy::Prepend => dedup_keep_first(incoming.iter().chain(existing).cloned()),
        UpdateStrategy::Remove => {
            let removed: HashSet<String> = incoming.iter().map(identity).collect();
            existing
                .iter()
                .filter(|id| !removed.contains(&identity(id)))
                .cloned()
                .collect()
        }
        UpdateStrategy::Custom(reducer) => match (reducer.0)(incoming, existing) {
            Value::Array(ids) => ids,
            returned => {
                return Err(Error::InvalidStrategyResult {
                    entity_type: entity_type.to_string(),
                    returned,
                });
            }
        },
    };
    Ok(Some(merged))
}

/// Fold `incoming` into `data[entity_type]` of the request's ledger entry.
///
/// `replace` stores `incoming` verbatim (a singular id stays singular, a raw
/// payload stays raw); every other strategy produces an id list. The entry is
/// created if the request was never seen.
pub fn merge(
    state: &CacheState,
    request_key: &RequestKey,
    entity_type: &str,
    incoming: &Value,
    strategy: &UpdateStrategy,
) -> Result<CacheState> {
    let next_value = match strategy {
        UpdateStrategy::Ignore => {
            debug!(request_key = %request_key, entity_type, "Merge skipped (strategy none)");
            return Ok(state.clone());
        }
        UpdateStrategy::Replace => incoming.clone(),
        list_strategy => {
            let existing = state
                .entry(request_key)
                .and_then(|entry| entry.data_for(entity_type))
                .map(as_id_list)
                .unwrap_or_default();
            let merged = merge_ids(list_strategy, &existing, &as_id_list(incoming), entity_type)?
                .unwrap_or(existing);
            Value::Array(merged)
        }
    };

    debug!(
        request_key = %request_key,
        entity_type,
        strategy = %strategy,
        "Merged ids into request ledger"
    );

    let requests = state.requests.with_entry(request_key, |entry| {
        entry.data.insert(entity_type.to_string(), next_value);
    });
    Ok(state.with_requests(requests))
}

/// Write an instruction's entities, then merge its ids under its own strategy
pub fn apply(state: &CacheState, instruction: &MergeInstruction) -> Result<CacheState> {
    let written = state.with_entities(state.entities.with_entities(&instruction.entities));
    merge(
        &written,
        &instruction.request_key,
        &instruction.entity_type,
        &instruction.result,
        &instruction.strategy,
    )
}
