//! Turning responses into merge instructions
//!
//! The cache never interprets raw response JSON itself. A [`PayloadComputer`]
//! receives the normalized definition, the response status and the raw body,
//! and decides what (if anything) is merged: which entities are written and
//! which ids the request resolves to.

mod flatten;

pub use flatten::{NormalizedPayload, normalize_payload};

use serde_json::Value;

use crate::definition::ResourceDefinition;
use crate::key::RequestKey;
use crate::merge::UpdateStrategy;
use crate::store::EntityBatch;
use crate::{Error, Result};

/// Outcome flags of a response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseStatus {
    /// The transport reported a failure
    pub is_error: bool,
    /// The response is usable data
    pub is_success: bool,
}

impl ResponseStatus {
    /// Successful response
    pub const SUCCESS: Self = Self {
        is_error: false,
        is_success: true,
    };

    /// Failed response
    pub const ERROR: Self = Self {
        is_error: true,
        is_success: false,
    };
}

/// Instruction executed by the merge engine
#[derive(Debug, Clone, PartialEq)]
pub struct MergeInstruction {
    /// Request whose ledger entry receives the ids
    pub request_key: RequestKey,
    /// Entity type bucket
    pub entity_type: String,
    /// Id, id list, or raw payload
    pub result: Value,
    /// Normalized entities to write
    pub entities: EntityBatch,
    /// Strategy for the request's own id list
    pub strategy: UpdateStrategy,
}

/// What to do with a response
#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    /// Write entities and merge ids
    Merge(MergeInstruction),
    /// Nothing to merge
    Skip,
}

/// Builds merge instructions from responses
pub trait PayloadComputer: Send + Sync {
    /// Compute the instruction for one response
    fn compute(
        &self,
        definition: &ResourceDefinition,
        status: ResponseStatus,
        response: &Value,
    ) -> Result<Instruction>;
}

/// Schema-driven payload computer.
///
/// Success responses pass through the definition's `transform`, are flattened
/// with [`normalize_payload`] and merged into the request's own entry.
/// Actions (definitions with a `source`) always replace their own entry; their
/// `update_strategy` is reserved for the source resource. Error responses
/// merge nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultPayloadComputer;

impl PayloadComputer for DefaultPayloadComputer {
    fn compute(
        &self,
        definition: &ResourceDefinition,
        status: ResponseStatus,
        response: &Value,
    ) -> Result<Instruction> {
        match (status.is_success, status.is_error) {
            (true, false) => {}
            (false, true) => return Ok(Instruction::Skip),
            _ => {
                return Err(Error::Payload(format!(
                    "ambiguous response status {status:?} for {}",
                    definition.url
                )));
            }
        }

        let transformed = definition.transform_response(response);
        let normalized = normalize_payload(&transformed, &definition.schema);
        let strategy = if definition.source.is_some() {
            UpdateStrategy::Replace
        } else {
            definition.update_strategy.clone()
        };

        Ok(Instruction::Merge(MergeInstruction {
            request_key: definition.request_key.clone(),
            entity_type: definition.entity_type().to_string(),
            result: normalized.result,
            entities: normalized.entities,
            strategy,
        }))
    }
}
