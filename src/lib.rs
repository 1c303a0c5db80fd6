//! Resource Cache Library
//!
//! Client-side data-fetching cache: declarative resource definitions,
//! de-duplicated requests and a flat, schema-keyed entity store.
//!
//! # Features
//!
//! - **Deterministic request keys**: order-independent canonicalization of
//!   headers, body and query parameters, hashed with SHA-256
//! - **Definition normalization**: `extends` layering, canonical URLs,
//!   method-dependent defaults, named actions
//! - **Entity normalization**: nested payloads flattened into per-type entity
//!   buckets shared by every request that references them
//! - **Merge strategies**: replace, append, prepend, remove, none, custom
//! - **Immutable snapshots**: every write produces a new [`store::CacheState`];
//!   stale responses are discarded by per-request generation counters
//!
//! ```
//! use resource_cache::{RawResourceDefinition, ResourceCache, normalize};
//! use serde_json::json;
//!
//! let users = normalize(RawResourceDefinition::new("http://api.example.com/users/7").with_schema("user"))?;
//! let cache = ResourceCache::new();
//! assert!(!cache.resolve(&users).is_hit());
//!
//! cache.prepopulate(&users, Some(&json!({"id": 7, "name": "Alice"})))?;
//! assert_eq!(cache.resolve(&users).value()["name"], "Alice");
//! # Ok::<(), resource_cache::Error>(())
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cache;
pub mod canonical;
pub mod cli;
pub mod config;
pub mod definition;
pub mod error;
pub mod fetch;
pub mod key;
pub mod merge;
pub mod payload;
pub mod resolver;
pub mod store;

pub use cache::{Completion, FetchStart, FetchTicket, ResourceCache};
pub use definition::{RawResourceDefinition, ResourceDefinition, Schema, normalize};
pub use error::{DefinitionError, Error, Result};
pub use fetch::{FetchOutcome, ResourceRequest, Transport};
pub use key::{RequestKey, derive_key};
pub use merge::UpdateStrategy;
pub use resolver::{Resolution, resolve};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use config::LogFormat;

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: LogFormat) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    let installed = match format {
        LogFormat::Json => subscriber.with(fmt::layer().json()).try_init(),
        LogFormat::Text => subscriber.with(fmt::layer()).try_init(),
    };

    installed.map_err(|e| Error::Config(format!("failed to install tracing subscriber: {e}")))
}
