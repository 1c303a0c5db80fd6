//! Canonical request URLs
//!
//! Declared URLs are parsed with the `url` crate (scheme and host lowercased,
//! default port dropped, dot segments resolved, `www.` kept as written), the
//! fragment is dropped, trailing slashes are stripped and the canonical
//! encoding of `params` is appended as the query string.

use serde_json::Value;
use url::{ParseError, Url};

use crate::canonical::query_string;
use crate::error::DefinitionError;

/// Canonical URL of a resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CanonicalUrl {
    /// URL without query string
    pub endpoint: String,
    /// Endpoint plus canonical query string
    pub full: String,
}

/// Build the canonical URL for a declared URL and its query parameters.
///
/// Relative URLs are resolved against `base`; without a base they are an error.
pub(crate) fn build_url(
    declared: &str,
    params: &Value,
    base: Option<&Url>,
) -> Result<CanonicalUrl, DefinitionError> {
    if declared.contains('?') {
        return Err(DefinitionError::LiteralQueryString(declared.to_string()));
    }

    let invalid = |reason: String| DefinitionError::InvalidUrl {
        url: declared.to_string(),
        reason,
    };

    let mut parsed = match Url::parse(declared) {
        Ok(url) => url,
        Err(ParseError::RelativeUrlWithoutBase) => match base {
            Some(base) => base.join(declared).map_err(|e| invalid(e.to_string()))?,
            None => return Err(invalid("relative url and no base url configured".to_string())),
        },
        Err(e) => return Err(invalid(e.to_string())),
    };
    parsed.set_fragment(None);
    parsed.set_query(None);

    let endpoint = parsed.as_str().trim_end_matches('/').to_string();
    let query = query_string(params);
    let full = if query.is_empty() {
        endpoint.clone()
    } else {
        format!("{endpoint}?{query}")
    };

    Ok(CanonicalUrl { endpoint, full })
}
