//! Process-wide resource cache
//!
//! [`ResourceCache`] owns the current [`CacheState`] snapshot behind an
//! `Arc`. Readers clone the `Arc` and resolve against a snapshot that never
//! changes under them; writers build the next snapshot from the current one
//! and swap it in. The write lock is held only for that swap.
//!
//! Fetch lifecycle:
//!
//! ```text
//! begin_fetch ──► Started(ticket) ──► complete(ticket) / fail(ticket)
//!      │                                  │
//!      └──► InFlight (already fetching)   └──► Discarded if the ticket's
//!                                              generation is no longer current
//! ```
//!
//! A ticket dropped without either call must be passed to
//! [`ResourceCache::abandon`], otherwise the request stays in flight and
//! every later fetch of it waits forever.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::definition::{Normalizer, RawResourceDefinition, ResourceDefinition};
use crate::key::RequestKey;
use crate::merge::{apply, merge};
use crate::payload::{DefaultPayloadComputer, Instruction, PayloadComputer, ResponseStatus};
use crate::resolver::{Resolution, resolve};
use crate::store::{CacheState, FetchFailure};
use crate::{Error, Result};

const DEFAULT_NAMESPACE: &str = "resource-cache";

/// Cache statistics tracked atomically
#[derive(Debug, Default)]
pub struct CacheStats {
    /// Resolutions answered from cache
    pub hits: AtomicU64,
    /// Resolutions that found nothing usable
    pub misses: AtomicU64,
    /// Fetches started
    pub fetches: AtomicU64,
    /// Fetch requests joined to one already in flight
    pub deduplicated: AtomicU64,
    /// Responses dropped because their generation was superseded
    pub discarded: AtomicU64,
    /// Fetches that ended in a transport failure
    pub failures: AtomicU64,
    /// Explicit and refetch-driven invalidations
    pub invalidations: AtomicU64,
    /// Fetches given up before their outcome was written
    pub abandoned: AtomicU64,
}

impl CacheStats {
    /// Current hit count
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Current miss count
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Hit rate (0.0-1.0)
    #[allow(clippy::cast_precision_loss)]
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits();
        let total = hits + self.misses();
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Serializable statistics snapshot
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStatsSnapshot {
    /// Resolutions answered from cache
    pub hits: u64,
    /// Resolutions that found nothing usable
    pub misses: u64,
    /// Hit rate (0.0-1.0)
    pub hit_rate: f64,
    /// Fetches started
    pub fetches: u64,
    /// Fetch requests joined to one already in flight
    pub deduplicated: u64,
    /// Superseded responses dropped
    pub discarded: u64,
    /// Transport failures
    pub failures: u64,
    /// Invalidations
    pub invalidations: u64,
    /// Fetches given up before reporting back
    pub abandoned: u64,
    /// Request ledger entries
    pub requests: usize,
    /// Entity types in the entity store
    pub entity_types: usize,
    /// Entities across all types
    pub entities: usize,
}

/// Permission to write one fetch's outcome
#[derive(Debug, Clone)]
pub struct FetchTicket {
    definition: ResourceDefinition,
    generation: u64,
}

impl FetchTicket {
    /// Definition being fetched
    #[must_use]
    pub fn definition(&self) -> &ResourceDefinition {
        &self.definition
    }

    /// Ledger generation this fetch belongs to
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Request key being fetched
    #[must_use]
    pub fn request_key(&self) -> &RequestKey {
        &self.definition.request_key
    }
}

/// Result of [`ResourceCache::begin_fetch`]
#[derive(Debug, Clone)]
pub enum FetchStart {
    /// The caller owns the fetch and must finish it with `complete`, `fail`
    /// or `abandon`
    Started(FetchTicket),
    /// Another caller is already fetching this request
    InFlight {
        /// Generation of the fetch in flight
        generation: u64,
    },
}

/// What happened to a finished fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// The outcome was written to the cache
    Applied,
    /// The ticket was superseded; nothing was written
    Discarded,
}

/// Process-wide resource cache handle
pub struct ResourceCache {
    state: RwLock<Arc<CacheState>>,
    payload: Arc<dyn PayloadComputer>,
    normalizer: Normalizer,
    in_flight: DashMap<RequestKey, Arc<Notify>>,
    stats: CacheStats,
    namespace: String,
}

impl Default for ResourceCache {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ResourceCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceCache")
            .field("namespace", &self.namespace)
            .field("requests", &self.snapshot().requests.len())
            .field("in_flight", &self.in_flight.len())
            .finish_non_exhaustive()
    }
}

impl ResourceCache {
    /// Empty cache with the schema-driven payload computer
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: RwLock::new(Arc::new(CacheState::new())),
            payload: Arc::new(DefaultPayloadComputer),
            normalizer: Normalizer::new(),
            in_flight: DashMap::new(),
            stats: CacheStats::default(),
            namespace: DEFAULT_NAMESPACE.to_string(),
        }
    }

    /// Cache configured from the `cache` section
    pub fn from_config(config: &Config) -> Result<Self> {
        let normalizer = match &config.cache.base_url {
            Some(base) => Normalizer::with_base_url(base)?,
            None => Normalizer::new(),
        };
        Ok(Self::new()
            .with_namespace(config.cache.namespace.clone())
            .with_normalizer(normalizer))
    }

    /// Replace the payload computer
    #[must_use]
    pub fn with_payload_computer(mut self, payload: Arc<dyn PayloadComputer>) -> Self {
        self.payload = payload;
        self
    }

    /// Replace the normalizer used by [`ResourceCache::define`]
    #[must_use]
    pub fn with_normalizer(mut self, normalizer: Normalizer) -> Self {
        self.normalizer = normalizer;
        self
    }

    /// Namespace attached to every log event
    #[must_use]
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Start from a previously captured state
    #[must_use]
    pub fn with_state(self, state: CacheState) -> Self {
        *self.state.write() = Arc::new(state);
        self
    }

    /// Log namespace
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Normalize a declaration with this cache's normalizer
    pub fn define(&self, raw: RawResourceDefinition) -> Result<ResourceDefinition> {
        self.normalizer.normalize(raw)
    }

    /// Current state snapshot
    #[must_use]
    pub fn snapshot(&self) -> Arc<CacheState> {
        Arc::clone(&self.state.read())
    }

    /// Resolve a definition against the current snapshot
    pub fn resolve(&self, definition: &ResourceDefinition) -> Resolution {
        let resolution = resolve(&self.snapshot(), definition);
        if resolution.is_hit() {
            CacheStats::bump(&self.stats.hits);
        } else {
            CacheStats::bump(&self.stats.misses);
        }
        debug!(
            namespace = %self.namespace,
            request_key = %definition.request_key,
            hit = resolution.is_hit(),
            "Resolved resource"
        );
        resolution
    }

    /// Ensure a ledger entry exists; with `initial` data, merge it as a
    /// successful response (hydration of server-rendered data).
    pub fn prepopulate(&self, definition: &ResourceDefinition, initial: Option<&Value>) -> Result<()> {
        let instruction = initial
            .map(|data| self.payload.compute(definition, ResponseStatus::SUCCESS, data))
            .transpose()?;

        self.update(|state| {
            let state = state.prepopulated(&definition.request_key);
            match &instruction {
                Some(instruction) => {
                    let state = write_response(&state, definition, instruction)?;
                    Ok((state.fetch_succeeded(&definition.request_key, Utc::now()), ()))
                }
                None => Ok((state, ())),
            }
        })?;

        debug!(
            namespace = %self.namespace,
            request_key = %definition.request_key,
            hydrated = initial.is_some(),
            "Prepopulated resource"
        );
        Ok(())
    }

    /// Mark a fetch as started, unless one is already in flight
    pub fn begin_fetch(&self, definition: &ResourceDefinition) -> FetchStart {
        let key = &definition.request_key;
        let mut state = self.state.write();

        if let Some(entry) = state.entry(key).filter(|entry| entry.meta.is_fetching) {
            let generation = entry.meta.generation;
            drop(state);
            CacheStats::bump(&self.stats.deduplicated);
            debug!(
                namespace = %self.namespace,
                request_key = %key,
                generation,
                "Fetch already in flight"
            );
            return FetchStart::InFlight { generation };
        }

        let (next, generation) = state.fetch_started(key);
        *state = Arc::new(next);
        self.in_flight.insert(key.clone(), Arc::new(Notify::new()));
        drop(state);

        CacheStats::bump(&self.stats.fetches);
        debug!(
            namespace = %self.namespace,
            request_key = %key,
            method = %definition.method,
            url = %definition.url,
            generation,
            "Fetch started"
        );
        FetchStart::Started(FetchTicket {
            definition: definition.clone(),
            generation,
        })
    }

    /// Write a successful response.
    ///
    /// A payload computer error is recorded as the request's failure and
    /// returned.
    pub fn complete(&self, ticket: &FetchTicket, response: &Value) -> Result<Completion> {
        let definition = ticket.definition();
        let key = ticket.request_key();

        let instruction = match self.payload.compute(definition, ResponseStatus::SUCCESS, response) {
            Ok(instruction) => instruction,
            Err(e) => return Err(self.settle_with_error(ticket, e)),
        };

        let outcome = self.update(|state| {
            if !state.is_current(key, ticket.generation) {
                return Ok((state.clone(), None));
            }
            let written = write_response(state, definition, &instruction)?;
            let mut next = written.fetch_succeeded(key, Utc::now());
            let invalidated = refetch_source(&mut next, definition, true);
            Ok((next, Some(invalidated)))
        });

        let invalidated = match outcome {
            Ok(Some(invalidated)) => invalidated,
            Ok(None) => return Ok(self.discarded(ticket)),
            Err(e) => return Err(self.settle_with_error(ticket, e)),
        };

        self.release(key);
        self.after_refetch(invalidated);
        info!(
            namespace = %self.namespace,
            request_key = %key,
            entity_type = definition.entity_type(),
            generation = ticket.generation,
            "Fetch completed"
        );
        Ok(Completion::Applied)
    }

    /// Record a transport failure.
    ///
    /// The payload computer still sees the failure (the default one merges
    /// nothing) and an action's `refetch_after` may invalidate its source.
    /// The failure is recorded even when the payload computer or the merge
    /// errors; that error is returned afterwards.
    pub fn fail(&self, ticket: &FetchTicket, failure: FetchFailure) -> Result<Completion> {
        let definition = ticket.definition();
        let key = ticket.request_key();
        let body = failure.body.clone().unwrap_or(Value::Null);
        let computed = self.payload.compute(definition, ResponseStatus::ERROR, &body);
        let (instruction, compute_error) = match computed {
            Ok(instruction) => (Some(instruction), None),
            Err(e) => (None, Some(e)),
        };

        let outcome = self.update(|state| {
            if !state.is_current(key, ticket.generation) {
                return Ok((state.clone(), None));
            }
            let written = instruction
                .as_ref()
                .map(|instruction| write_response(state, definition, instruction));
            let (written, write_error) = match written {
                Some(Ok(written)) => (written, None),
                Some(Err(e)) => (state.clone(), Some(e)),
                None => (state.clone(), None),
            };
            let mut next = written.fetch_failed(key, failure.clone());
            let invalidated = refetch_source(&mut next, definition, false);
            Ok((next, Some((invalidated, write_error))))
        })?;

        let Some((invalidated, write_error)) = outcome else {
            return match compute_error {
                Some(e) => Err(e),
                None => Ok(self.discarded(ticket)),
            };
        };

        CacheStats::bump(&self.stats.failures);
        self.release(key);
        self.after_refetch(invalidated);
        warn!(
            namespace = %self.namespace,
            request_key = %key,
            status = ?failure.status,
            error = %failure.message,
            "Fetch failed"
        );
        match compute_error.or(write_error) {
            Some(e) => Err(e),
            None => Ok(Completion::Applied),
        }
    }

    /// Give up on a fetch whose outcome will never arrive (the transport
    /// call was cancelled or timed out).
    ///
    /// The request stops being in flight, waiters are woken and the next
    /// `begin_fetch` starts a new fetch. A superseded ticket is a no-op.
    pub fn abandon(&self, ticket: &FetchTicket) -> Completion {
        let key = ticket.request_key();
        let abandoned = self
            .update(|state| {
                let pending = state.entry(key).is_some_and(|entry| {
                    entry.meta.is_fetching && entry.meta.generation == ticket.generation
                });
                if !pending {
                    return Ok((state.clone(), false));
                }
                Ok((state.fetch_abandoned(key), true))
            })
            .unwrap_or(false);
        if !abandoned {
            return Completion::Discarded;
        }

        CacheStats::bump(&self.stats.abandoned);
        self.release(key);
        warn!(
            namespace = %self.namespace,
            request_key = %key,
            generation = ticket.generation,
            "Fetch abandoned"
        );
        Completion::Applied
    }

    /// Flag a request invalid so the next read is a miss.
    ///
    /// Responses in flight for it are discarded when they land. Unknown keys
    /// are ignored.
    pub fn invalidate(&self, key: &RequestKey) {
        let known = self
            .update(|state| Ok((state.invalidated(key), state.requests.contains(key))))
            .unwrap_or(false);
        if known {
            CacheStats::bump(&self.stats.invalidations);
            self.release(key);
            info!(namespace = %self.namespace, request_key = %key, "Invalidated resource");
        }
    }

    /// Wait until the fetch of `generation` for `key` is no longer in flight
    pub async fn wait_for(&self, key: &RequestKey, generation: u64) {
        loop {
            let Some(signal) = self.in_flight.get(key).map(|entry| Arc::clone(entry.value())) else {
                return;
            };
            let notified = signal.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let still_fetching = self.snapshot().entry(key).is_some_and(|entry| {
                entry.meta.is_fetching && entry.meta.generation == generation
            });
            if !still_fetching {
                return;
            }
            notified.await;
        }
    }

    /// Statistics snapshot
    #[must_use]
    pub fn stats(&self) -> CacheStatsSnapshot {
        let state = self.snapshot();
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        CacheStatsSnapshot {
            hits: self.stats.hits(),
            misses: self.stats.misses(),
            hit_rate: self.stats.hit_rate(),
            fetches: load(&self.stats.fetches),
            deduplicated: load(&self.stats.deduplicated),
            discarded: load(&self.stats.discarded),
            failures: load(&self.stats.failures),
            invalidations: load(&self.stats.invalidations),
            abandoned: load(&self.stats.abandoned),
            requests: state.requests.len(),
            entity_types: state.entities.types().count(),
            entities: state.entities.len(),
        }
    }

    /// Build the next snapshot from the current one and swap it in
    fn update<T>(&self, f: impl FnOnce(&CacheState) -> Result<(CacheState, T)>) -> Result<T> {
        let mut state = self.state.write();
        let (next, output) = f(&state)?;
        *state = Arc::new(next);
        Ok(output)
    }

    /// Wake everyone waiting on `key`
    fn release(&self, key: &RequestKey) {
        if let Some((_, signal)) = self.in_flight.remove(key) {
            signal.notify_waiters();
        }
    }

    fn after_refetch(&self, invalidated: Option<RequestKey>) {
        if let Some(source) = invalidated {
            CacheStats::bump(&self.stats.invalidations);
            self.release(&source);
            info!(
                namespace = %self.namespace,
                request_key = %source,
                "Invalidated source resource after mutation"
            );
        }
    }

    /// Record `error` as the request's failure and hand it back
    fn settle_with_error(&self, ticket: &FetchTicket, error: Error) -> Error {
        if let Err(e) = self.fail(ticket, FetchFailure::new(error.to_string())) {
            debug!(
                namespace = %self.namespace,
                request_key = %ticket.request_key(),
                error = %e,
                "Failure recording also errored"
            );
        }
        error
    }

    fn discarded(&self, ticket: &FetchTicket) -> Completion {
        CacheStats::bump(&self.stats.discarded);
        warn!(
            namespace = %self.namespace,
            request_key = %ticket.request_key(),
            generation = ticket.generation,
            "Discarded superseded response"
        );
        Completion::Discarded
    }
}

/// Apply a payload instruction.
///
/// Entities are written when the response is stored or belongs to an action
/// (so a mutation's returned entity updates every view of it). The request's
/// own ids are recorded only when `store` is set; an action's ids are also
/// folded into its source with the action's update strategy, but only once
/// the source holds data of that entity type. A source that was never loaded
/// stays a miss.
fn write_response(
    state: &CacheState,
    definition: &ResourceDefinition,
    instruction: &Instruction,
) -> Result<CacheState> {
    let Instruction::Merge(instruction) = instruction else {
        return Ok(state.clone());
    };

    let mut next = if definition.store {
        apply(state, instruction)?
    } else if definition.source.is_some() {
        state.with_entities(state.entities.with_entities(&instruction.entities))
    } else {
        state.clone()
    };

    let loaded_source = definition.source.as_ref().filter(|source| {
        next.entry(source)
            .is_some_and(|entry| entry.data_for(&instruction.entity_type).is_some())
    });
    if let Some(source) = loaded_source {
        next = merge(
            &next,
            source,
            &instruction.entity_type,
            &instruction.result,
            &definition.update_strategy,
        )?;
    }
    Ok(next)
}

/// Invalidate an action's source when its `refetch_after` policy says so
fn refetch_source(state: &mut CacheState, definition: &ResourceDefinition, succeeded: bool) -> Option<RequestKey> {
    let source = definition.source.as_ref()?;
    if !definition.refetch_after.triggers(succeeded) || !state.requests.contains(source) {
        return None;
    }
    *state = state.invalidated(source);
    Some(source.clone())
}
