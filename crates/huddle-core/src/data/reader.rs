//! Policy-driven reads.
//!
//! Every read resolves its route through the registry, consults the cache
//! according to the caller's [`CachePolicy`], and falls back to the transport.
//! Fetched values are committed to the store only after the whole request and
//! decode succeeded, so a failed or cancelled fetch never disturbs what is
//! already cached.

use std::sync::Arc;

use serde::{de::DeserializeOwned, Serialize};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};
use url::Url;

use super::{CachePolicy, DataResult};
use crate::api::{endpoint_url, ApiError, Transport};
use crate::cache::{CacheStore, InFlight};
use crate::error::DataError;
use crate::registry::{CacheOperations, Registry, ResourceDescriptor};

/// Cheap to clone; clones share the in-flight set and background task pool.
#[derive(Clone)]
pub struct DataReader {
    transport: Arc<dyn Transport>,
    registry: Arc<Registry>,
    base_url: Url,
    in_flight: InFlight,
    cancel: CancellationToken,
    tasks: TaskTracker,
}

impl DataReader {
    pub fn new(transport: Arc<dyn Transport>, registry: Arc<Registry>, base_url: Url) -> Self {
        Self {
            transport,
            registry,
            base_url,
            in_flight: InFlight::new(),
            cancel: CancellationToken::new(),
            tasks: TaskTracker::new(),
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<CacheStore> {
        self.registry.store()
    }

    pub fn in_flight(&self) -> &InFlight {
        &self.in_flight
    }

    /// Token cancelled on shutdown. Background jobs select on it.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Pool every background task of this reader's service is spawned on.
    pub fn tasks(&self) -> &TaskTracker {
        &self.tasks
    }

    pub async fn read<T>(
        &self,
        descriptor: &ResourceDescriptor,
        policy: CachePolicy,
    ) -> Result<DataResult<T>, DataError>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
    {
        let ops = self.registry.operations::<T>(descriptor)?;

        match policy {
            CachePolicy::CacheOnly => match ops.provide() {
                Some(entry) => Ok(DataResult::from_cache(entry.value)),
                None => {
                    debug!(key = %ops.cache_key, "Cache-only read missed");
                    Err(DataError::NoCachedData)
                }
            },
            CachePolicy::ApiOnly => self.fetch_and_store(&ops).await.map(DataResult::from_api),
            CachePolicy::CacheFirst { background_refresh } => {
                if let Some(entry) = ops.provide() {
                    debug!(key = %ops.cache_key, age = %entry.age_display(), "Cache hit");
                    if background_refresh {
                        self.spawn_refresh_ops(ops);
                    }
                    return Ok(DataResult::from_cache(entry.value));
                }

                debug!(key = %ops.cache_key, "Cache miss, fetching");
                self.fetch_and_store(&ops).await.map(DataResult::from_api)
            }
        }
    }

    /// Start a background refresh of `descriptor` unless one is already in
    /// flight for its key. Returns whether a refresh was started.
    pub fn spawn_refresh<T>(&self, descriptor: &ResourceDescriptor) -> Result<bool, DataError>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
    {
        let ops = self.registry.operations::<T>(descriptor)?;
        Ok(self.spawn_refresh_ops(ops))
    }

    fn spawn_refresh_ops<T>(&self, ops: CacheOperations<T>) -> bool
    where
        T: Serialize + DeserializeOwned + Send + 'static,
    {
        if self.cancel.is_cancelled() {
            return false;
        }

        let Some(guard) = self.in_flight.try_begin(&ops.cache_key) else {
            debug!(key = %ops.cache_key, "Refresh already in flight, skipping");
            return false;
        };

        let reader = self.clone();
        let cancel = self.cancel.clone();
        self.tasks.spawn(async move {
            let _guard = guard;
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(key = %ops.cache_key, "Background refresh cancelled");
                }
                result = reader.fetch_and_store(&ops) => match result {
                    Ok(_) => debug!(key = %ops.cache_key, "Background refresh complete"),
                    Err(e) => warn!(
                        key = %ops.cache_key,
                        error = %e,
                        "Background refresh failed, keeping cached data"
                    ),
                },
            }
        });
        true
    }

    /// Fetch, decode and commit. Nothing is written unless all three succeed.
    async fn fetch_and_store<T>(&self, ops: &CacheOperations<T>) -> Result<T, DataError>
    where
        T: Serialize + DeserializeOwned,
    {
        let url = endpoint_url(&self.base_url, &ops.endpoint)
            .ok_or_else(|| DataError::InvalidUrl(ops.endpoint.clone()))?;

        let ticket = ops.begin_fetch();
        let raw = self.transport.fetch(&url, &ops.parameters).await?;

        let value: T = serde_json::from_value(raw).map_err(|e| {
            warn!(key = %ops.cache_key, error = %e, "Response did not match the expected shape");
            ApiError::Serialization(e)
        })?;

        if !ops.commit(&ticket, &value)? {
            debug!(key = %ops.cache_key, "Discarded out-of-order fetch result");
        }
        Ok(value)
    }

    /// Wait for every background refresh spawned so far to finish.
    pub async fn wait_for_background(&self) {
        self.tasks.close();
        self.tasks.wait().await;
        self.tasks.reopen();
    }

    /// Cancel background work and wait for it to wind down. Reads issued
    /// afterwards still work; they just never spawn refreshes.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.tasks.close();
        self.tasks.wait().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::mock::{MockTransport, Reply};
    use crate::data::DataSource;
    use crate::api::Parameters;
    use crate::registry::{ResourceKind, Route};
    use serde_json::json;
    use std::time::Duration;
    use uuid::Uuid;

    const BASE: &str = "https://api.test/";

    fn setup() -> (DataReader, Arc<MockTransport>, Arc<CacheStore>) {
        let mock = Arc::new(MockTransport::new());
        let store = Arc::new(CacheStore::new());
        let registry = Arc::new(Registry::with_defaults(Arc::clone(&store)));
        let transport: Arc<dyn Transport> = mock.clone();
        let reader = DataReader::new(transport, registry, Url::parse(BASE).unwrap());
        (reader, mock, store)
    }

    fn interests(user: Uuid) -> ResourceDescriptor {
        ResourceDescriptor::ProfileInterests { user_id: user }
    }

    fn interests_path(user: Uuid) -> String {
        format!("/users/{}/interests", user)
    }

    #[tokio::test]
    async fn test_cache_first_hit_does_not_wait_for_network() {
        let (reader, mock, store) = setup();
        let user = Uuid::from_u128(1);
        store.set(&interests(user).cache_key(), &vec!["chess"]).unwrap();
        mock.set_latency(Duration::from_secs(10));
        mock.push(&interests_path(user), Reply::Json(json!(["tennis"])));

        let result = tokio::time::timeout(
            Duration::from_millis(500),
            reader.read::<Vec<String>>(
                &interests(user),
                CachePolicy::CacheFirst {
                    background_refresh: true,
                },
            ),
        )
        .await
        .expect("cache hit returned without waiting on the transport")
        .unwrap();

        assert_eq!(result.data, vec!["chess".to_string()]);
        assert_eq!(result.source, DataSource::Cache);
        reader.shutdown().await;
    }

    #[tokio::test]
    async fn test_cache_first_miss_fetches_once_then_hits() {
        let (reader, mock, _store) = setup();
        let user = Uuid::from_u128(1);
        mock.push(&interests_path(user), Reply::Json(json!(["tennis", "chess"])));

        let fetched = reader
            .read::<Vec<String>>(
                &interests(user),
                CachePolicy::CacheFirst {
                    background_refresh: false,
                },
            )
            .await
            .unwrap();
        assert_eq!(fetched.source, DataSource::Api);
        assert_eq!(mock.call_count("GET"), 1);

        let cached = reader
            .read::<Vec<String>>(&interests(user), CachePolicy::CacheOnly)
            .await
            .unwrap();
        assert_eq!(cached.source, DataSource::Cache);
        assert_eq!(cached.data, fetched.data);
        assert_eq!(mock.call_count("GET"), 1);
    }

    #[tokio::test]
    async fn test_cache_only_miss_never_touches_network() {
        let (reader, mock, _store) = setup();
        let result = reader
            .read::<Vec<String>>(&interests(Uuid::from_u128(1)), CachePolicy::CacheOnly)
            .await;

        assert!(matches!(result, Err(DataError::NoCachedData)));
        assert!(mock.calls().is_empty());
    }

    #[tokio::test]
    async fn test_failed_background_refresh_keeps_cached_value() {
        let (reader, mock, store) = setup();
        let user = Uuid::from_u128(1);
        store.set(&interests(user).cache_key(), &vec!["chess"]).unwrap();
        mock.push(&interests_path(user), Reply::ServerError);

        reader
            .read::<Vec<String>>(
                &interests(user),
                CachePolicy::CacheFirst {
                    background_refresh: true,
                },
            )
            .await
            .unwrap();
        reader.wait_for_background().await;

        assert_eq!(mock.call_count("GET"), 1);
        let cached = reader
            .read::<Vec<String>>(&interests(user), CachePolicy::CacheOnly)
            .await
            .unwrap();
        assert_eq!(cached.data, vec!["chess".to_string()]);
    }

    #[tokio::test]
    async fn test_background_refresh_updates_store_only() {
        let (reader, mock, store) = setup();
        let user = Uuid::from_u128(1);
        store.set(&interests(user).cache_key(), &vec!["chess"]).unwrap();
        mock.push(&interests_path(user), Reply::Json(json!(["tennis"])));

        let first = reader
            .read::<Vec<String>>(&interests(user), CachePolicy::default())
            .await
            .unwrap();
        assert_eq!(first.data, vec!["chess".to_string()]);

        reader.wait_for_background().await;
        let refreshed = store
            .get::<Vec<String>>(&interests(user).cache_key())
            .unwrap();
        assert_eq!(refreshed.value, vec!["tennis".to_string()]);
    }

    #[tokio::test]
    async fn test_background_refresh_deduplicates_per_key() {
        let (reader, mock, store) = setup();
        let user = Uuid::from_u128(1);
        store.set(&interests(user).cache_key(), &vec!["chess"]).unwrap();
        mock.set_latency(Duration::from_millis(50));
        mock.push(&interests_path(user), Reply::Json(json!(["tennis"])));

        for _ in 0..3 {
            reader
                .read::<Vec<String>>(&interests(user), CachePolicy::default())
                .await
                .unwrap();
        }
        assert!(reader.in_flight().is_in_flight(&interests(user).cache_key()));

        reader.wait_for_background().await;
        assert_eq!(mock.call_count("GET"), 1);
        assert!(reader.in_flight().is_empty());
    }

    #[tokio::test]
    async fn test_api_only_failure_surfaces_error_and_keeps_cache() {
        let (reader, mock, store) = setup();
        let user = Uuid::from_u128(1);
        store.set(&interests(user).cache_key(), &vec!["chess"]).unwrap();
        mock.push(&interests_path(user), Reply::NotFound);

        let result = reader
            .read::<Vec<String>>(&interests(user), CachePolicy::ApiOnly)
            .await;
        assert!(matches!(
            result,
            Err(DataError::ApiFailed(ApiError::NotFound(_)))
        ));
        assert_eq!(
            store
                .get::<Vec<String>>(&interests(user).cache_key())
                .unwrap()
                .value,
            vec!["chess".to_string()]
        );
    }

    #[tokio::test]
    async fn test_undecodable_response_is_api_failure() {
        let (reader, mock, store) = setup();
        let user = Uuid::from_u128(1);
        mock.push(&interests_path(user), Reply::Json(json!({"unexpected": true})));

        let result = reader
            .read::<Vec<String>>(&interests(user), CachePolicy::ApiOnly)
            .await;
        assert!(matches!(
            result,
            Err(DataError::ApiFailed(ApiError::Serialization(_)))
        ));
        assert!(!store.contains(&interests(user).cache_key()));
    }

    #[tokio::test]
    async fn test_unregistered_kind_is_rejected() {
        let mock = Arc::new(MockTransport::new());
        let registry = Arc::new(Registry::empty(Arc::new(CacheStore::new())));
        let reader = DataReader::new(mock.clone(), registry, Url::parse(BASE).unwrap());

        let result = reader
            .read::<Vec<String>>(&interests(Uuid::from_u128(1)), CachePolicy::ApiOnly)
            .await;
        assert!(matches!(
            result,
            Err(DataError::UnsupportedDataType(ResourceKind::ProfileInterests))
        ));
        assert!(mock.calls().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_endpoint_is_invalid_url() {
        let mock = Arc::new(MockTransport::new());
        let mut registry = Registry::with_defaults(Arc::new(CacheStore::new()));
        registry.register(ResourceKind::ProfileInterests, |descriptor| Route {
            endpoint: "/absolute/path".to_string(),
            parameters: Parameters::new(),
            cache_key: descriptor.cache_key(),
        });
        let reader = DataReader::new(mock.clone(), Arc::new(registry), Url::parse(BASE).unwrap());

        let result = reader
            .read::<Vec<String>>(&interests(Uuid::from_u128(1)), CachePolicy::ApiOnly)
            .await;
        assert!(matches!(result, Err(DataError::InvalidUrl(_))));
        assert!(mock.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_refresh_without_committing() {
        let (reader, mock, store) = setup();
        let user = Uuid::from_u128(1);
        store.set(&interests(user).cache_key(), &vec!["chess"]).unwrap();
        mock.set_latency(Duration::from_secs(30));
        mock.push(&interests_path(user), Reply::Json(json!(["tennis"])));

        reader
            .read::<Vec<String>>(&interests(user), CachePolicy::default())
            .await
            .unwrap();
        tokio::task::yield_now().await;
        reader.shutdown().await;

        assert_eq!(
            store
                .get::<Vec<String>>(&interests(user).cache_key())
                .unwrap()
                .value,
            vec!["chess".to_string()]
        );
        assert!(reader.in_flight().is_empty());
        assert!(!reader.spawn_refresh::<Vec<String>>(&interests(user)).unwrap());
    }

    #[tokio::test]
    async fn test_activity_detail_sends_requesting_user() {
        let (reader, mock, _store) = setup();
        let activity = Uuid::from_u128(10);
        let viewer = Uuid::from_u128(20);
        let path = format!("/activities/{}", activity);
        mock.push(
            &path,
            Reply::Json(serde_json::to_value(crate::models::activity::sample_activity(
                10,
                chrono::Utc::now(),
                None,
            ))
            .unwrap()),
        );

        let result = reader
            .read::<crate::models::Activity>(
                &ResourceDescriptor::ActivityDetail {
                    activity_id: activity,
                    requesting_user_id: viewer,
                },
                CachePolicy::ApiOnly,
            )
            .await
            .unwrap();
        assert_eq!(result.data.id, activity);
        assert!(mock.calls()[0].url.ends_with(&path));
    }
}
