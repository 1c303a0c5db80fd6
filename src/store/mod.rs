//! Cache state: entity store plus request ledger
//!
//! A [`CacheState`] is an immutable snapshot. Every lifecycle transition
//! below borrows the current snapshot and returns the next one, so readers
//! holding an older snapshot never observe a half-applied write.

mod entities;
mod ledger;

pub use entities::{EntityBatch, EntityStore, entity_id_key};
pub use ledger::{FetchFailure, RequestLedger, RequestLedgerEntry, RequestMeta};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::key::RequestKey;

/// Process-wide cache snapshot
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheState {
    /// Normalized entities, shared across requests
    #[serde(default)]
    pub entities: EntityStore,
    /// Per-request metadata and ids
    #[serde(default)]
    pub requests: RequestLedger,
}

impl CacheState {
    /// Empty state
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Ledger entry for a request
    #[must_use]
    pub fn entry(&self, key: &RequestKey) -> Option<&RequestLedgerEntry> {
        self.requests.get(key)
    }

    /// Whether `generation` is still the entry's current generation
    #[must_use]
    pub fn is_current(&self, key: &RequestKey, generation: u64) -> bool {
        self.entry(key)
            .is_some_and(|entry| entry.meta.generation == generation)
    }

    /// Ensure a placeholder entry exists
    #[must_use]
    pub fn prepopulated(&self, key: &RequestKey) -> Self {
        if self.requests.contains(key) {
            return self.clone();
        }
        self.with_requests(self.requests.with_entry(key, |_| {}))
    }

    /// Mark a fetch as started; returns the new state and the fetch generation
    #[must_use]
    pub fn fetch_started(&self, key: &RequestKey) -> (Self, u64) {
        let mut generation = 0;
        let requests = self.requests.with_entry(key, |entry| {
            entry.meta.generation += 1;
            entry.meta.is_fetching = true;
            entry.meta.error = None;
            generation = entry.meta.generation;
        });
        (self.with_requests(requests), generation)
    }

    /// Mark the entry fresh after a successful response was merged
    #[must_use]
    pub fn fetch_succeeded(&self, key: &RequestKey, at: DateTime<Utc>) -> Self {
        self.with_requests(self.requests.with_entry(key, |entry| {
            entry.meta.is_fetching = false;
            entry.meta.did_invalidate = false;
            entry.meta.error = None;
            entry.meta.fetched_at = Some(at);
        }))
    }

    /// Record a transport failure
    #[must_use]
    pub fn fetch_failed(&self, key: &RequestKey, failure: FetchFailure) -> Self {
        self.with_requests(self.requests.with_entry(key, |entry| {
            entry.meta.is_fetching = false;
            entry.meta.error = Some(failure);
        }))
    }

    /// Give up on a fetch that will never report back.
    ///
    /// Clears `is_fetching` and bumps the generation so the abandoned ticket
    /// can no longer write; data and error from earlier fetches are kept.
    #[must_use]
    pub fn fetch_abandoned(&self, key: &RequestKey) -> Self {
        self.with_requests(self.requests.with_existing_entry(key, |entry| {
            entry.meta.is_fetching = false;
            entry.meta.generation += 1;
        }))
    }

    /// Flag an existing entry invalid.
    ///
    /// Also bumps the generation and clears `is_fetching`, so a response that
    /// was in flight across the invalidation is discarded on arrival.
    #[must_use]
    pub fn invalidated(&self, key: &RequestKey) -> Self {
        self.with_requests(self.requests.with_existing_entry(key, |entry| {
            entry.meta.did_invalidate = true;
            entry.meta.is_fetching = false;
            entry.meta.generation += 1;
        }))
    }

    /// Replace the entity store
    #[must_use]
    pub fn with_entities(&self, entities: EntityStore) -> Self {
        Self {
            entities,
            requests: self.requests.clone(),
        }
    }

    /// Replace the request ledger
    #[must_use]
    pub fn with_requests(&self, requests: RequestLedger) -> Self {
        Self {
            entities: self.entities.clone(),
            requests,
        }
    }
}
