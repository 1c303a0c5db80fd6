//! Flat, schema-keyed entity store
//!
//! `{ entity_type: { id: entity } }`. Buckets sit behind `Arc` so producing a
//! new snapshot only copies the buckets a write actually touches.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Entities produced by one payload, grouped by entity type then id
pub type EntityBatch = BTreeMap<String, BTreeMap<String, Value>>;

/// Store key of an entity id.
///
/// Strings and numbers are accepted; `7` and `"7"` address the same entity.
/// Any other JSON value is not an id.
#[must_use]
pub fn entity_id_key(id: &Value) -> Option<String> {
    match id {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Entity store shared by every request that references the same type
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityStore(BTreeMap<String, Arc<BTreeMap<String, Value>>>);

impl EntityStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All entities of one type, if any were ever written
    #[must_use]
    pub fn bucket(&self, entity_type: &str) -> Option<&BTreeMap<String, Value>> {
        self.0.get(entity_type).map(|bucket| &**bucket)
    }

    /// Live entity for `(entity_type, id)`
    #[must_use]
    pub fn get(&self, entity_type: &str, id: &Value) -> Option<&Value> {
        let key = entity_id_key(id)?;
        self.bucket(entity_type)?.get(&key)
    }

    /// Whether the store has a bucket for `entity_type`
    #[must_use]
    pub fn contains_type(&self, entity_type: &str) -> bool {
        self.0.contains_key(entity_type)
    }

    /// Entity type names with a bucket
    pub fn types(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Total number of stored entities across all types
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.values().map(|bucket| bucket.len()).sum()
    }

    /// Whether no entity is stored
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// New store with every entity of `batch` written, overwriting same ids
    #[must_use]
    pub fn with_entities(&self, batch: &EntityBatch) -> Self {
        let mut next = self.clone();
        for (entity_type, entities) in batch {
            if entities.is_empty() {
                continue;
            }
            let bucket = Arc::make_mut(next.0.entry(entity_type.clone()).or_default());
            for (id, entity) in entities {
                bucket.insert(id.clone(), entity.clone());
            }
        }
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn batch(entity_type: &str, entities: &[(&str, Value)]) -> EntityBatch {
        let mut batch = EntityBatch::new();
        batch.insert(
            entity_type.to_string(),
            entities
                .iter()
                .map(|(id, e)| ((*id).to_string(), e.clone()))
                .collect(),
        );
        batch
    }

    #[test]
    fn test_entity_id_key() {
        assert_eq!(entity_id_key(&json!(7)), Some("7".to_string()));
        assert_eq!(entity_id_key(&json!("7")), Some("7".to_string()));
        assert_eq!(entity_id_key(&json!({"id": 7})), None);
        assert_eq!(entity_id_key(&Value::Null), None);
    }

    #[test]
    fn test_write_and_read() {
        let store = EntityStore::new()
            .with_entities(&batch("user", &[("1", json!({"id": 1, "name": "A"}))]));

        assert_eq!(store.get("user", &json!(1)), Some(&json!({"id": 1, "name": "A"})));
        assert_eq!(store.get("user", &json!("1")), Some(&json!({"id": 1, "name": "A"})));
        assert!(store.get("user", &json!(2)).is_none());
        assert!(store.contains_type("user"));
        assert!(!store.contains_type("team"));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_write_overwrites_and_keeps_old_snapshot() {
        let before = EntityStore::new()
            .with_entities(&batch("user", &[("1", json!({"name": "A"}))]));
        let after = before.with_entities(&batch("user", &[("1", json!({"name": "B"}))]));

        assert_eq!(before.get("user", &json!(1)), Some(&json!({"name": "A"})));
        assert_eq!(after.get("user", &json!(1)), Some(&json!({"name": "B"})));
    }

    #[test]
    fn test_empty_batch_creates_no_bucket() {
        let mut empty = EntityBatch::new();
        empty.insert("user".to_string(), BTreeMap::new());
        let store = EntityStore::new().with_entities(&empty);
        assert!(!store.contains_type("user"));
        assert!(store.is_empty());
    }

    #[test]
    fn test_serializes_as_nested_map() {
        let store = EntityStore::new()
            .with_entities(&batch("user", &[("1", json!({"id": 1}))]));
        let json = serde_json::to_value(&store).unwrap();
        assert_eq!(json, json!({"user": {"1": {"id": 1}}}));
        let parsed: EntityStore = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, store);
    }
}
