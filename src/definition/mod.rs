//! Resource definitions: declaration, schema and normalization

mod normalizer;
mod raw;
mod schema;
mod url;

pub use normalizer::{Normalizer, ResourceDefinition, normalize};
pub use raw::{RawResourceDefinition, RefetchAfter, TransformFn};
pub use schema::{EntitySchema, Schema};

use std::path::Path;

use crate::{Error, Result};

/// Parse a raw declaration from YAML (JSON is accepted too)
pub fn parse_definition(content: &str) -> Result<RawResourceDefinition> {
    serde_yaml::from_str(content).map_err(Error::from)
}

/// Read and parse a declaration file
pub async fn load_definition_file(path: &Path) -> Result<RawResourceDefinition> {
    let content = tokio::fs::read_to_string(path).await?;
    parse_definition(&content)
}
