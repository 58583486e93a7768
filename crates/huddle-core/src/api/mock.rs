//! Scripted in-memory transport for tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use url::Url;

use super::transport::{Parameters, Transport};
use super::ApiError;

/// One request observed by the mock.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub method: &'static str,
    pub url: String,
    pub body: Option<Value>,
}

/// A scripted reply for a URL path.
#[derive(Debug, Clone)]
pub enum Reply {
    Json(Value),
    NoContent,
    NotFound,
    ServerError,
}

/// Transport that serves scripted replies keyed by URL path.
///
/// Replies queued with `push` are consumed in order; the last one for a path
/// keeps being served once the queue drains down to it.
#[derive(Default)]
pub struct MockTransport {
    replies: Mutex<HashMap<String, VecDeque<Reply>>>,
    calls: Mutex<Vec<RecordedCall>>,
    latency: Mutex<Option<Duration>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, path: &str, reply: Reply) {
        self.replies
            .lock()
            .unwrap()
            .entry(path.to_string())
            .or_default()
            .push_back(reply);
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap() = Some(latency);
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self, method: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.method == method)
            .count()
    }

    async fn respond(
        &self,
        method: &'static str,
        url: &Url,
        body: Option<Value>,
    ) -> Result<Option<Value>, ApiError> {
        self.calls.lock().unwrap().push(RecordedCall {
            method,
            url: url.to_string(),
            body,
        });

        let latency = *self.latency.lock().unwrap();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let reply = {
            let mut replies = self.replies.lock().unwrap();
            match replies.get_mut(url.path()) {
                Some(queue) if queue.len() > 1 => queue.pop_front(),
                Some(queue) => queue.front().cloned(),
                None => None,
            }
        };

        match reply {
            Some(Reply::Json(value)) => Ok(Some(value)),
            Some(Reply::NoContent) => Ok(None),
            Some(Reply::ServerError) => Err(ApiError::ServerError("scripted failure".into())),
            Some(Reply::NotFound) | None => Err(ApiError::NotFound(url.path().to_string())),
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn fetch(&self, url: &Url, _parameters: &Parameters) -> Result<Value, ApiError> {
        self.respond("GET", url, None)
            .await?
            .ok_or(ApiError::EmptyResponse)
    }

    async fn send(
        &self,
        body: Value,
        url: &Url,
        _parameters: &Parameters,
    ) -> Result<Option<Value>, ApiError> {
        self.respond("POST", url, Some(body)).await
    }

    async fn update(
        &self,
        body: Value,
        url: &Url,
        _parameters: &Parameters,
    ) -> Result<Value, ApiError> {
        self.respond("PUT", url, Some(body))
            .await?
            .ok_or(ApiError::EmptyResponse)
    }

    async fn patch(&self, url: &Url, body: Value) -> Result<Value, ApiError> {
        self.respond("PATCH", url, Some(body))
            .await?
            .ok_or(ApiError::EmptyResponse)
    }

    async fn delete(
        &self,
        url: &Url,
        _parameters: &Parameters,
        body: Option<Value>,
    ) -> Result<(), ApiError> {
        self.respond("DELETE", url, body).await.map(|_| ())
    }
}
