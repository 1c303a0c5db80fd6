//! Error types for the resource cache

use std::io;

use thiserror::Error;

/// Result type alias for the resource cache
pub type Result<T> = std::result::Result<T, Error>;

/// Resource cache errors
///
/// Transport failures are deliberately absent: a failed fetch is recorded as
/// [`crate::store::FetchFailure`] in the request ledger, never raised.
#[derive(Error, Debug)]
pub enum Error {
    /// Resource definition could not be normalized
    #[error("Definition error: {0}")]
    Definition(#[from] DefinitionError),

    /// A custom merge strategy returned something other than an id list
    #[error("Merge strategy for {entity_type} returned a non-list value: {returned}")]
    InvalidStrategyResult {
        /// Entity type whose id list was being merged
        entity_type: String,
        /// The offending return value
        returned: serde_json::Value,
    },

    /// Payload computer could not build a merge instruction
    #[error("Payload error: {0}")]
    Payload(String),

    /// Named action is not declared on the resource
    #[error("Unknown action '{action}' on resource {url}")]
    UnknownAction {
        /// Requested action name
        action: String,
        /// URL of the owning resource
        url: String,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Programmer errors detected while normalizing a resource definition
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DefinitionError {
    /// No schema after resolving the `extends` chain
    #[error("resource definition for {url} has no schema")]
    MissingSchema {
        /// URL of the offending definition (or `<unknown>`)
        url: String,
    },

    /// No URL after resolving the `extends` chain
    #[error("resource definition has no url")]
    MissingUrl,

    /// URL carries a literal query string; query parameters belong in `params`
    #[error("url {0} contains a literal query string, use `params` instead")]
    LiteralQueryString(String),

    /// URL could not be parsed or resolved against the base URL
    #[error("invalid url {url}: {reason}")]
    InvalidUrl {
        /// The URL as declared
        url: String,
        /// Parser message
        reason: String,
    },

    /// Method is empty or not a token
    #[error("invalid http method '{0}'")]
    InvalidMethod(String),
}

impl Error {
    /// Returns `true` for errors caused by an invalid resource declaration
    #[must_use]
    pub fn is_definition_error(&self) -> bool {
        matches!(self, Self::Definition(_) | Self::UnknownAction { .. })
    }
}
