//! Schema-driven payload normalization
//!
//! Nested JSON is flattened into an [`EntityBatch`]: every entity is stored
//! under its type and id, and nested entities named by the schema's
//! relations are replaced by their ids.
//!
//! ```text
//! {"id": 1, "author": {"id": 7, "name": "Alice"}}     schema post{author: user}
//!   => result 1
//!      entities {post: {1: {"id": 1, "author": 7}}, user: {7: {...}}}
//! ```
//!
//! A payload that does not fit the schema (no id, primitive, wrong shape) is
//! returned raw with no entities.

use serde_json::{Map, Value};

use crate::definition::{EntitySchema, Schema};
use crate::store::{EntityBatch, entity_id_key};

/// Flattened payload
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedPayload {
    /// Id, id list, or the raw payload when it did not fit the schema
    pub result: Value,
    /// Entities extracted from the payload
    pub entities: EntityBatch,
    /// Whether the payload fit the schema
    pub normalized: bool,
}

impl NormalizedPayload {
    fn raw(value: &Value) -> Self {
        Self {
            result: value.clone(),
            entities: EntityBatch::new(),
            normalized: false,
        }
    }
}

/// Flatten `value` according to `schema`
#[must_use]
pub fn normalize_payload(value: &Value, schema: &Schema) -> NormalizedPayload {
    let mut entities = EntityBatch::new();

    let result = match schema {
        Schema::Entity(entity) => visit_entity(value, entity, &mut entities),
        Schema::Collection { items } => match value {
            Value::Array(list) => list
                .iter()
                .map(|item| visit_entity(item, items, &mut entities))
                .collect::<Option<Vec<_>>>()
                .map(Value::Array),
            _ => None,
        },
    };

    match result {
        Some(result) => NormalizedPayload {
            result,
            entities,
            normalized: true,
        },
        None => NormalizedPayload::raw(value),
    }
}

/// Store one entity (and its relations) in `entities`, returning its id
fn visit_entity(value: &Value, schema: &EntitySchema, entities: &mut EntityBatch) -> Option<Value> {
    let object = value.as_object()?;
    let id = object.get(&schema.id_attribute)?;
    let key = entity_id_key(id)?;

    let mut flat = object.clone();
    for (field, relation) in &schema.relations {
        let Some(nested) = object.get(field) else {
            continue;
        };
        let replaced = match relation {
            Schema::Entity(nested_schema) => visit_entity(nested, nested_schema, entities),
            Schema::Collection { items } => nested.as_array().map(|list| {
                Value::Array(
                    list.iter()
                        .map(|item| {
                            visit_entity(item, items, entities).unwrap_or_else(|| item.clone())
                        })
                        .collect(),
                )
            }),
        };
        if let Some(reference) = replaced {
            flat.insert(field.clone(), reference);
        }
    }

    let bucket = entities.entry(schema.key.clone()).or_default();
    match bucket.get_mut(&key) {
        Some(Value::Object(existing)) => shallow_merge(existing, flat),
        _ => {
            bucket.insert(key, Value::Object(flat));
        }
    }

    Some(id.clone())
}

fn shallow_merge(target: &mut Map<String, Value>, source: Map<String, Value>) {
    for (field, value) in source {
        target.insert(field, value);
    }
}
