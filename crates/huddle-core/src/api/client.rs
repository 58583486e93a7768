//! HTTP transport for the Huddle REST API.
//!
//! `HttpTransport` implements [`Transport`] on top of reqwest with bearer-token
//! authentication. Requests are made exactly as asked; the only retry it
//! performs is a bounded backoff when an idempotent GET is rate limited.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client, RequestBuilder};
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use super::transport::{Parameters, Transport};
use super::ApiError;

// ============================================================================
// Constants
// ============================================================================

/// Default HTTP request timeout in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Maximum number of retries for rate-limited (429) GET requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

/// HTTP transport for the Huddle API.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    token: Option<Arc<str>>,
}

impl HttpTransport {
    /// Create a new transport with the given request timeout
    pub fn new(timeout: Duration) -> Result<Self, ApiError> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            token: None,
        })
    }

    /// Set the bearer token for authenticated requests
    pub fn set_token(&mut self, token: impl Into<Arc<str>>) {
        self.token = Some(token.into());
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        let builder = builder.header(header::ACCEPT, "application/json");
        match self.token {
            Some(ref token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Check if response is successful, returning an error with body if not.
    /// Returns Ok(None) for a rate limit so the caller can back off and retry.
    async fn check_response_for_retry(
        response: reqwest::Response,
    ) -> Result<Option<reqwest::Response>, ApiError> {
        if response.status().is_success() {
            Ok(Some(response))
        } else if response.status().as_u16() == 429 {
            Ok(None)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    /// Check if response is successful, returning an error with body if not.
    async fn check_response(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    /// Read a response body as JSON, treating an empty body as no content.
    async fn read_optional_json(response: reqwest::Response) -> Result<Option<Value>, ApiError> {
        let text = response.text().await?;
        if text.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(&text)?))
    }

    async fn read_json(response: reqwest::Response, url: &Url) -> Result<Value, ApiError> {
        Self::read_optional_json(response).await?.ok_or_else(|| {
            debug!(url = %url, "Empty response body");
            ApiError::EmptyResponse
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn fetch(&self, url: &Url, parameters: &Parameters) -> Result<Value, ApiError> {
        let mut retries = 0;
        let mut backoff_ms = INITIAL_BACKOFF_MS;

        loop {
            let response = self
                .authorized(self.client.get(url.clone()).query(parameters))
                .send()
                .await?;

            match Self::check_response_for_retry(response).await? {
                Some(response) => return Self::read_json(response, url).await,
                None => {
                    retries += 1;
                    if retries > MAX_RATE_LIMIT_RETRIES {
                        return Err(ApiError::RateLimited);
                    }
                    warn!(url = %url, retry = retries, backoff_ms = backoff_ms, "Rate limited, backing off");
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    backoff_ms *= 2;
                }
            }
        }
    }

    async fn send(
        &self,
        body: Value,
        url: &Url,
        parameters: &Parameters,
    ) -> Result<Option<Value>, ApiError> {
        let response = self
            .authorized(self.client.post(url.clone()).query(parameters).json(&body))
            .send()
            .await?;

        let response = Self::check_response(response).await?;
        Self::read_optional_json(response).await
    }

    async fn update(
        &self,
        body: Value,
        url: &Url,
        parameters: &Parameters,
    ) -> Result<Value, ApiError> {
        let response = self
            .authorized(self.client.put(url.clone()).query(parameters).json(&body))
            .send()
            .await?;

        let response = Self::check_response(response).await?;
        Self::read_json(response, url).await
    }

    async fn patch(&self, url: &Url, body: Value) -> Result<Value, ApiError> {
        let response = self
            .authorized(self.client.patch(url.clone()).json(&body))
            .send()
            .await?;

        let response = Self::check_response(response).await?;
        Self::read_json(response, url).await
    }

    async fn delete(
        &self,
        url: &Url,
        parameters: &Parameters,
        body: Option<Value>,
    ) -> Result<(), ApiError> {
        let mut builder = self.client.delete(url.clone()).query(parameters);
        if let Some(ref body) = body {
            builder = builder.json(body);
        }

        let response = self.authorized(builder).send().await?;
        Self::check_response(response).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_token_enables_bearer_auth() {
        let mut transport = HttpTransport::new(Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS))
            .expect("client builds");
        assert!(transport.token.is_none());

        transport.set_token("abc");
        assert_eq!(transport.token.as_deref(), Some("abc"));
    }
}
