//! Fetching through a pluggable transport
//!
//! The cache never performs network I/O itself. A [`Transport`] sends a
//! [`ResourceRequest`] and returns either the response JSON or a
//! [`FetchFailure`]; the helpers here drive the cache's fetch lifecycle
//! around it.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::debug;

use crate::Result;
use crate::cache::{Completion, FetchStart, FetchTicket, ResourceCache};
use crate::definition::ResourceDefinition;
use crate::resolver::{Resolution, resolve};
use crate::store::FetchFailure;

/// Request handed to the transport
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceRequest {
    /// Uppercase HTTP method
    pub method: String,
    /// Absolute URL including the query string
    pub url: String,
    /// Request headers
    pub headers: Map<String, Value>,
    /// Request body, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

impl From<&ResourceDefinition> for ResourceRequest {
    fn from(definition: &ResourceDefinition) -> Self {
        Self {
            method: definition.method.clone(),
            url: definition.url.clone(),
            headers: definition.headers.clone(),
            body: (!definition.body.is_null()).then(|| definition.body.clone()),
        }
    }
}

/// Network transport
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one request
    async fn send(&self, request: &ResourceRequest) -> std::result::Result<Value, FetchFailure>;
}

/// Outcome of a mutation
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    /// The transport returned this response and it was applied
    Succeeded(Value),
    /// The transport failed; the failure was recorded
    Failed(FetchFailure),
    /// The response arrived after the request was superseded
    Discarded,
    /// An identical request was already in flight; this call waited for it
    Joined,
}

impl ResourceCache {
    /// Resolve, fetching only on a miss
    pub async fn fetch(&self, definition: &ResourceDefinition, transport: &dyn Transport) -> Result<Resolution> {
        let resolution = self.resolve(definition);
        if resolution.is_hit() {
            return Ok(resolution);
        }
        self.refetch(definition, transport).await
    }

    /// Fetch regardless of cached data, joining a fetch already in flight
    pub async fn refetch(&self, definition: &ResourceDefinition, transport: &dyn Transport) -> Result<Resolution> {
        self.run(definition, transport).await?;
        Ok(resolve(&self.snapshot(), definition))
    }

    /// Run the named action of `definition`
    pub async fn mutate(
        &self,
        definition: &ResourceDefinition,
        action: &str,
        transport: &dyn Transport,
    ) -> Result<FetchOutcome> {
        let action = definition.action(action)?;
        self.run(action, transport).await
    }

    async fn run(&self, definition: &ResourceDefinition, transport: &dyn Transport) -> Result<FetchOutcome> {
        let ticket = match self.begin_fetch(definition) {
            FetchStart::Started(ticket) => ticket,
            FetchStart::InFlight { generation } => {
                self.wait_for(&definition.request_key, generation).await;
                return Ok(FetchOutcome::Joined);
            }
        };

        let request = ResourceRequest::from(definition);
        debug!(
            namespace = %self.namespace(),
            method = %request.method,
            url = %request.url,
            "Sending request"
        );

        // dropping this future while the transport is pending abandons the ticket
        let pending = PendingFetch::new(self, &ticket);
        let sent = transport.send(&request).await;
        pending.finish();

        match sent {
            Ok(response) => {
                let completion = self.complete(&ticket, &response)?;
                Ok(settled(&ticket, completion, FetchOutcome::Succeeded(response)))
            }
            Err(failure) => {
                let completion = self.fail(&ticket, failure.clone())?;
                Ok(settled(&ticket, completion, FetchOutcome::Failed(failure)))
            }
        }
    }
}

/// Ticket of a fetch whose transport call has not returned yet
///
/// Abandons the ticket on drop unless [`PendingFetch::finish`] ran first.
struct PendingFetch<'a> {
    cache: &'a ResourceCache,
    ticket: &'a FetchTicket,
    finished: bool,
}

impl<'a> PendingFetch<'a> {
    fn new(cache: &'a ResourceCache, ticket: &'a FetchTicket) -> Self {
        Self {
            cache,
            ticket,
            finished: false,
        }
    }

    fn finish(mut self) {
        self.finished = true;
    }
}

impl Drop for PendingFetch<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.cache.abandon(self.ticket);
        }
    }
}

fn settled(ticket: &FetchTicket, completion: Completion, applied: FetchOutcome) -> FetchOutcome {
    match completion {
        Completion::Applied => applied,
        Completion::Discarded => {
            debug!(request_key = %ticket.request_key(), "Outcome superseded");
            FetchOutcome::Discarded
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{RawResourceDefinition, normalize};
    use serde_json::json;

    #[test]
    fn test_request_from_definition() {
        let def = normalize(
            RawResourceDefinition::new("http://a/users")
                .with_schema("user")
                .with_method("post")
                .with_param("draft", true)
                .with_header("Accept", "application/json")
                .with_body(json!({"name": "Alice"})),
        )
        .unwrap();

        let request = ResourceRequest::from(&def);
        assert_eq!(request.method, "POST");
        assert_eq!(request.url, "http://a/users?draft=true");
        assert_eq!(request.headers["Accept"], json!("application/json"));
        assert_eq!(request.body, Some(json!({"name": "Alice"})));
    }

    #[test]
    fn test_get_request_has_no_body() {
        let def = normalize(RawResourceDefinition::new("http://a/users/7").with_schema("user")).unwrap();
        assert!(ResourceRequest::from(&def).body.is_none());
    }
}
