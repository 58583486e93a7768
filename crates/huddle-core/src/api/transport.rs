//! The transport seam between the data layer and the network.
//!
//! Bodies and responses cross this boundary as `serde_json::Value` so the
//! trait stays object-safe; typed decoding happens in the reader and writer.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::Value;
use url::Url;

use super::ApiError;

/// Query parameters attached to a request.
/// Ordered so that URLs and cache keys built from them are deterministic.
pub type Parameters = BTreeMap<String, String>;

#[async_trait]
pub trait Transport: Send + Sync {
    /// GET a resource.
    async fn fetch(&self, url: &Url, parameters: &Parameters) -> Result<Value, ApiError>;

    /// POST a body. Returns `None` when the server replies without content.
    async fn send(
        &self,
        body: Value,
        url: &Url,
        parameters: &Parameters,
    ) -> Result<Option<Value>, ApiError>;

    /// PUT a body.
    async fn update(&self, body: Value, url: &Url, parameters: &Parameters)
        -> Result<Value, ApiError>;

    /// PATCH a body. Any parameters are already encoded in `url`.
    async fn patch(&self, url: &Url, body: Value) -> Result<Value, ApiError>;

    /// DELETE a resource, optionally with a body.
    async fn delete(
        &self,
        url: &Url,
        parameters: &Parameters,
        body: Option<Value>,
    ) -> Result<(), ApiError>;
}

/// Resolve a relative endpoint against the API base URL.
///
/// Returns `None` when the endpoint is empty, absolute, or does not form a
/// valid URL under the base.
pub fn endpoint_url(base: &Url, endpoint: &str) -> Option<Url> {
    let endpoint = endpoint.trim();
    if endpoint.is_empty() || endpoint.starts_with('/') || endpoint.contains("://") {
        return None;
    }
    if endpoint.chars().any(char::is_whitespace) {
        return None;
    }

    // Url::join drops the last path segment unless the base ends with '/'
    let base = if base.path().ends_with('/') {
        base.clone()
    } else {
        let mut base = base.clone();
        let path = format!("{}/", base.path());
        base.set_path(&path);
        base
    };

    base.join(endpoint).ok()
}

/// Append parameters to a URL's query string.
pub fn with_query(mut url: Url, parameters: &Parameters) -> Url {
    if !parameters.is_empty() {
        url.query_pairs_mut().extend_pairs(parameters.iter());
    }
    url
}
