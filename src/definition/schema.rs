//! Entity schemas
//!
//! A schema names the storage bucket (entity type) a resource's payload is
//! normalized into. It accepts three declaration forms:
//!
//! ```yaml
//! schema: user                     # singular entity, id attribute `id`
//! schema: { key: user, id_attribute: uuid, relations: { team: team } }
//! schema: { items: user }          # collection of `user`
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

const DEFAULT_ID_ATTRIBUTE: &str = "id";

/// Schema of a single entity type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "EntitySchemaRepr")]
pub struct EntitySchema {
    /// Entity type key (storage bucket name)
    pub key: String,
    /// Attribute holding the entity id
    pub id_attribute: String,
    /// Nested fields that hold other entities
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub relations: BTreeMap<String, Schema>,
}

impl EntitySchema {
    /// Entity schema with the default `id` attribute and no relations
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            id_attribute: DEFAULT_ID_ATTRIBUTE.to_string(),
            relations: BTreeMap::new(),
        }
    }

    /// Use a different id attribute
    #[must_use]
    pub fn with_id_attribute(mut self, attribute: impl Into<String>) -> Self {
        self.id_attribute = attribute.into();
        self
    }

    /// Declare a nested entity field
    #[must_use]
    pub fn with_relation(mut self, field: impl Into<String>, schema: impl Into<Schema>) -> Self {
        self.relations.insert(field.into(), schema.into());
        self
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum EntitySchemaRepr {
    Key(String),
    Full {
        key: String,
        #[serde(default = "default_id_attribute")]
        id_attribute: String,
        #[serde(default)]
        relations: BTreeMap<String, Schema>,
    },
}

fn default_id_attribute() -> String {
    DEFAULT_ID_ATTRIBUTE.to_string()
}

impl From<EntitySchemaRepr> for EntitySchema {
    fn from(repr: EntitySchemaRepr) -> Self {
        match repr {
            EntitySchemaRepr::Key(key) => Self::new(key),
            EntitySchemaRepr::Full {
                key,
                id_attribute,
                relations,
            } => Self {
                key,
                id_attribute,
                relations,
            },
        }
    }
}

/// Schema of a resource payload: one entity, or a collection of one entity type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Schema {
    /// Collection of entities (`{ items: ... }`)
    Collection {
        /// Schema of each item
        items: EntitySchema,
    },
    /// Single entity
    Entity(EntitySchema),
}

impl Schema {
    /// Singular schema with the default id attribute
    pub fn entity(key: impl Into<String>) -> Self {
        Self::Entity(EntitySchema::new(key))
    }

    /// Collection of entities with the default id attribute
    pub fn collection(key: impl Into<String>) -> Self {
        Self::Collection {
            items: EntitySchema::new(key),
        }
    }

    /// Entity type key used as the storage bucket
    #[must_use]
    pub fn key(&self) -> &str {
        &self.entity_schema().key
    }

    /// Schema of the entity itself (the item schema for collections)
    #[must_use]
    pub fn entity_schema(&self) -> &EntitySchema {
        match self {
            Self::Entity(schema) | Self::Collection { items: schema } => schema,
        }
    }

    /// Whether the payload is a list of entities
    #[must_use]
    pub fn is_array(&self) -> bool {
        matches!(self, Self::Collection { .. })
    }
}

impl From<&str> for Schema {
    fn from(key: &str) -> Self {
        Self::entity(key)
    }
}

impl From<String> for Schema {
    fn from(key: String) -> Self {
        Self::entity(key)
    }
}

impl From<EntitySchema> for Schema {
    fn from(schema: EntitySchema) -> Self {
        Self::Entity(schema)
    }
}
