//! Mutations.
//!
//! A write is validated locally, dispatched on its HTTP method, and on success
//! evicts the cache keys it declared stale. Failures are surfaced as-is:
//! there is no retry and nothing is invalidated.

use std::sync::Arc;

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use super::{DataResult, HttpMethod, WriteOperation};
use crate::api::{endpoint_url, with_query, ApiError, Transport};
use crate::cache::CacheStore;
use crate::error::DataError;

#[derive(Clone)]
pub struct DataWriter {
    transport: Arc<dyn Transport>,
    store: Arc<CacheStore>,
    base_url: Url,
}

impl DataWriter {
    pub fn new(transport: Arc<dyn Transport>, store: Arc<CacheStore>, base_url: Url) -> Self {
        Self {
            transport,
            store,
            base_url,
        }
    }

    /// Send a POST, PUT or PATCH and decode the response as `T`.
    pub async fn write<B, T>(
        &self,
        operation: WriteOperation<B>,
        invalidate_cache: bool,
    ) -> Result<DataResult<T>, DataError>
    where
        B: Serialize,
        T: DeserializeOwned,
    {
        match operation.method {
            HttpMethod::Get => return Err(read_through_writer()),
            HttpMethod::Delete => {
                return Err(DataError::UnsupportedOperation {
                    method: HttpMethod::Delete,
                    context: "DELETE returns no content, use write_without_response".to_string(),
                })
            }
            HttpMethod::Post | HttpMethod::Put | HttpMethod::Patch => {}
        }

        let body = encode_body(&operation)?;
        let response = self.dispatch(&operation, body).await?;
        self.apply_invalidation(&operation, invalidate_cache);

        let raw = response.ok_or_else(|| {
            warn!(method = %operation.method, endpoint = %operation.endpoint, "Write returned no content");
            ApiError::EmptyResponse
        })?;
        let data: T = serde_json::from_value(raw).map_err(ApiError::Serialization)?;
        Ok(DataResult::from_api(data))
    }

    /// Send any non-GET write, ignoring whatever the server returns.
    pub async fn write_without_response<B>(
        &self,
        operation: WriteOperation<B>,
        invalidate_cache: bool,
    ) -> Result<DataResult<()>, DataError>
    where
        B: Serialize,
    {
        if operation.method == HttpMethod::Get {
            return Err(read_through_writer());
        }

        let body = encode_body(&operation)?;
        self.dispatch(&operation, body).await?;
        self.apply_invalidation(&operation, invalidate_cache);
        Ok(DataResult::from_api(()))
    }

    async fn dispatch<B>(
        &self,
        operation: &WriteOperation<B>,
        body: Option<Value>,
    ) -> Result<Option<Value>, DataError> {
        let url = endpoint_url(&self.base_url, &operation.endpoint)
            .ok_or_else(|| DataError::InvalidUrl(operation.endpoint.clone()))?;
        let parameters = &operation.parameters;

        debug!(method = %operation.method, url = %url, "Sending write");

        let result = match (operation.method, body) {
            (HttpMethod::Post, Some(body)) => self.transport.send(body, &url, parameters).await,
            (HttpMethod::Put, Some(body)) => {
                self.transport.update(body, &url, parameters).await.map(Some)
            }
            (HttpMethod::Patch, Some(body)) => {
                let url = with_query(url, parameters);
                self.transport.patch(&url, body).await.map(Some)
            }
            (HttpMethod::Delete, body) => self
                .transport
                .delete(&url, parameters, body)
                .await
                .map(|_| None),
            (HttpMethod::Get, _) => return Err(read_through_writer()),
            (_, None) => return Err(DataError::MissingRequestBody),
        };

        result.map_err(|e| {
            warn!(method = %operation.method, endpoint = %operation.endpoint, error = %e, "Write failed");
            DataError::ApiFailed(e)
        })
    }

    fn apply_invalidation<B>(&self, operation: &WriteOperation<B>, invalidate_cache: bool) {
        if !invalidate_cache || operation.cache_invalidation_keys.is_empty() {
            return;
        }
        debug!(
            count = operation.cache_invalidation_keys.len(),
            "Invalidating cache after write"
        );
        self.store.invalidate(&operation.cache_invalidation_keys);
    }
}

fn read_through_writer() -> DataError {
    DataError::UnsupportedOperation {
        method: HttpMethod::Get,
        context: "reads go through the data reader".to_string(),
    }
}

/// Serialize the body, enforcing presence for methods that need one.
fn encode_body<B: Serialize>(operation: &WriteOperation<B>) -> Result<Option<Value>, DataError> {
    match &operation.body {
        Some(body) => Ok(Some(serde_json::to_value(body)?)),
        None if operation.method.requires_body() => Err(DataError::MissingRequestBody),
        None => Ok(None),
    }
}
