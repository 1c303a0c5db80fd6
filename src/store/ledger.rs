//! Request ledger: per-request metadata and the ids each request resolved to
//!
//! Entries are never removed. Invalidation only flags an entry so id
//! references held by already rendered views stay valid.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::key::RequestKey;

/// Transport failure recorded for a request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchFailure {
    /// Human-readable failure message
    pub message: String,
    /// HTTP status, when the failure came from a response
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    /// Error body returned by the server
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

impl FetchFailure {
    /// Failure without a response (connection refused, DNS, ...)
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: None,
            body: None,
        }
    }

    /// Failure carrying an HTTP status
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            ..Self::new(message)
        }
    }

    /// Attach the error body returned by the server
    #[must_use]
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }
}

/// Fetch status of one request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestMeta {
    /// A fetch for this request is in flight
    #[serde(default)]
    pub is_fetching: bool,
    /// The cached ids must not be served; the next read is a miss
    #[serde(default)]
    pub did_invalidate: bool,
    /// Failure of the last completed fetch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<FetchFailure>,
    /// Bumped by every fetch start and invalidation; stale responses carry an older value
    #[serde(default)]
    pub generation: u64,
    /// When the last successful response was merged
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fetched_at: Option<DateTime<Utc>>,
}

/// Ledger entry for one request key
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestLedgerEntry {
    /// Fetch status
    #[serde(default)]
    pub meta: RequestMeta,
    /// Ids (or raw payload) this request resolved to, per entity type
    #[serde(default)]
    pub data: BTreeMap<String, Value>,
}

impl RequestLedgerEntry {
    /// Recorded value for an entity type
    #[must_use]
    pub fn data_for(&self, entity_type: &str) -> Option<&Value> {
        self.data.get(entity_type)
    }
}

/// Ledger of every request the cache has seen
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestLedger(BTreeMap<RequestKey, RequestLedgerEntry>);

impl RequestLedger {
    /// Create an empty ledger
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Entry for a request
    #[must_use]
    pub fn get(&self, key: &RequestKey) -> Option<&RequestLedgerEntry> {
        self.0.get(key)
    }

    /// Whether an entry exists
    #[must_use]
    pub fn contains(&self, key: &RequestKey) -> bool {
        self.0.contains_key(key)
    }

    /// Number of entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the ledger is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate entries in key order
    pub fn iter(&self) -> impl Iterator<Item = (&RequestKey, &RequestLedgerEntry)> {
        self.0.iter()
    }

    /// New ledger with `update` applied to the entry, creating a placeholder if absent
    #[must_use]
    pub fn with_entry(&self, key: &RequestKey, update: impl FnOnce(&mut RequestLedgerEntry)) -> Self {
        let mut next = self.clone();
        update(next.0.entry(key.clone()).or_default());
        next
    }

    /// New ledger with `update` applied only if the entry exists
    #[must_use]
    pub fn with_existing_entry(
        &self,
        key: &RequestKey,
        update: impl FnOnce(&mut RequestLedgerEntry),
    ) -> Self {
        let mut next = self.clone();
        if let Some(entry) = next.0.get_mut(key) {
            update(entry);
        }
        next
    }
}
