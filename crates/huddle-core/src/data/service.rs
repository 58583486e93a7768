//! Single entry point the app talks to.
//!
//! `DataService` owns one reader, one writer, the refresh scheduler and the
//! expiration sweeper, all sharing one [`CacheStore`]. Build it once at
//! startup and pass it around; logging out shuts it down and clears the store.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use serde::{de::DeserializeOwned, Serialize};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use super::{CachePolicy, DataReader, DataResult, DataWriter, WriteOperation};
use crate::api::Transport;
use crate::auth::AuthContext;
use crate::cache::{CacheKey, CacheStore, CacheSubscription};
use crate::config::Config;
use crate::error::DataError;
use crate::lock::mutex_lock;
use crate::models::{Activity, FriendRequest};
use crate::registry::{Registry, ResourceDescriptor, ResourceKind};
use crate::scheduler::RefreshScheduler;
use crate::sweeper::{ExpirationRule, ExpirationSweeper};

const SOURCE: &str = "data::service";

/// Concurrent fetches issued by [`DataService::refresh_all`].
const MAX_CONCURRENT_REFRESHES: usize = 4;

pub struct DataService {
    store: Arc<CacheStore>,
    auth: Arc<dyn AuthContext>,
    reader: DataReader,
    writer: DataWriter,
    scheduler: RefreshScheduler,
    rule: ExpirationRule,
    jobs: TaskTracker,
    sweeper_cancel: Mutex<Option<CancellationToken>>,
}

impl DataService {
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<CacheStore>,
        auth: Arc<dyn AuthContext>,
        base_url: Url,
        rule: ExpirationRule,
    ) -> Self {
        let registry = Arc::new(Registry::with_defaults(Arc::clone(&store)));
        let reader = DataReader::new(Arc::clone(&transport), registry, base_url.clone());
        let writer = DataWriter::new(transport, Arc::clone(&store), base_url);
        let scheduler = RefreshScheduler::new(reader.clone(), Arc::clone(&auth));

        Self {
            store,
            auth,
            reader,
            writer,
            scheduler,
            rule,
            jobs: TaskTracker::new(),
            sweeper_cancel: Mutex::new(None),
        }
    }

    pub fn from_config(
        config: &Config,
        transport: Arc<dyn Transport>,
        store: Arc<CacheStore>,
        auth: Arc<dyn AuthContext>,
    ) -> anyhow::Result<Self> {
        let rule = ExpirationRule::new(config.fallback_zone()?);
        Ok(Self::new(transport, store, auth, config.base_url()?, rule))
    }

    pub fn store(&self) -> &Arc<CacheStore> {
        &self.store
    }

    pub async fn read<T>(
        &self,
        descriptor: &ResourceDescriptor,
        policy: CachePolicy,
    ) -> Result<DataResult<T>, DataError>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
    {
        self.reader.read(descriptor, policy).await
    }

    pub async fn write<B, T>(
        &self,
        operation: WriteOperation<B>,
        invalidate_cache: bool,
    ) -> Result<DataResult<T>, DataError>
    where
        B: Serialize,
        T: DeserializeOwned,
    {
        self.writer.write(operation, invalidate_cache).await
    }

    pub async fn write_without_response<B>(
        &self,
        operation: WriteOperation<B>,
        invalidate_cache: bool,
    ) -> Result<DataResult<()>, DataError>
    where
        B: Serialize,
    {
        self.writer
            .write_without_response(operation, invalidate_cache)
            .await
    }

    /// Refetch every per-user resource, a few at a time. Returns the kinds
    /// that failed; their cached values are left as they were.
    pub async fn refresh_all(&self, user_id: Uuid) -> Vec<(ResourceKind, DataError)> {
        let descriptors = [
            ResourceDescriptor::Activities { user_id },
            ResourceDescriptor::ActivityTypes { user_id },
            ResourceDescriptor::Friends { user_id },
            ResourceDescriptor::FriendRequests { user_id },
            ResourceDescriptor::ProfileStats { user_id },
            ResourceDescriptor::ProfileInterests { user_id },
            ResourceDescriptor::ProfileSocialMedia { user_id },
            ResourceDescriptor::ProfileInfo { user_id },
        ];

        let mut failures = Vec::new();
        for chunk in descriptors.chunks(MAX_CONCURRENT_REFRESHES) {
            let futures: Vec<_> = chunk
                .iter()
                .map(|descriptor| async move {
                    let result = self
                        .reader
                        .read::<serde_json::Value>(descriptor, CachePolicy::ApiOnly)
                        .await;
                    (descriptor.kind(), result)
                })
                .collect();

            for (kind, result) in futures::future::join_all(futures).await {
                if let Err(e) = result {
                    warn!(kind = %kind, error = %e, "Refresh failed");
                    failures.push((kind, e));
                }
            }
        }
        failures
    }

    /// Events for the given keys only (plus `Cleared`).
    pub fn subscribe(&self, keys: impl IntoIterator<Item = CacheKey>) -> CacheSubscription {
        self.store.subscribe_keys(keys)
    }

    pub fn subscribe_all(&self) -> CacheSubscription {
        self.store.subscribe()
    }

    /// A user's activities with locally expired ones hidden. The visible view
    /// in the store is brought up to date as a side effect.
    pub async fn visible_activities(
        &self,
        user_id: Uuid,
        policy: CachePolicy,
    ) -> Result<DataResult<Vec<Activity>>, DataError> {
        let result = self
            .read::<Vec<Activity>>(&ResourceDescriptor::Activities { user_id }, policy)
            .await?;

        let now = Utc::now();
        self.sweeper().sweep_collection(user_id, now);
        Ok(result.map(|activities| self.rule.sweep(&activities, now)))
    }

    fn sweeper(&self) -> ExpirationSweeper {
        ExpirationSweeper::new(Arc::clone(&self.store), Arc::clone(&self.auth), self.rule)
    }

    /// Start the expiration sweeper.
    pub fn start_sweeper(&self, interval: Duration) {
        let cancel = self.reader.cancellation_token().child_token();
        let previous = mutex_lock(&self.sweeper_cancel, SOURCE, "start_sweeper").replace(cancel.clone());
        if let Some(previous) = previous {
            previous.cancel();
            debug!("Replaced running expiration sweeper");
        }
        self.sweeper().spawn(interval, cancel, &self.jobs);
        info!(interval_secs = interval.as_secs(), "Expiration sweeper started");
    }

    /// Stop the background sweeper. Reads, writes and scheduled refreshes
    /// keep working. Returns whether a sweeper was running.
    pub fn stop_sweeper(&self) -> bool {
        match mutex_lock(&self.sweeper_cancel, SOURCE, "stop_sweeper").take() {
            Some(cancel) => {
                cancel.cancel();
                info!("Expiration sweeper stopped");
                true
            }
            None => false,
        }
    }

    /// Keep `descriptor` fresh in the background.
    pub fn schedule<T>(&self, descriptor: ResourceDescriptor, interval: Duration) -> Result<(), DataError>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
    {
        self.scheduler.schedule::<T>(descriptor, interval)
    }

    /// Sweeper plus scheduled refresh of the signed-in user's feed and
    /// friend requests.
    pub fn start_background(&self, config: &Config) -> Result<(), DataError> {
        self.start_sweeper(config.sweep_interval());

        if let Some(user_id) = self.auth.current_user_id() {
            let interval = config.refresh_interval();
            self.schedule::<Vec<Activity>>(ResourceDescriptor::Activities { user_id }, interval)?;
            self.schedule::<Vec<FriendRequest>>(
                ResourceDescriptor::FriendRequests { user_id },
                interval,
            )?;
        }
        Ok(())
    }

    /// Wait for background refreshes started by cache-first reads.
    pub async fn wait_for_refreshes(&self) {
        self.reader.wait_for_background().await;
    }

    /// Cancel all background work and wait for it to stop.
    pub async fn shutdown(&self) {
        self.scheduler.shutdown().await;
        self.reader.shutdown().await;
        mutex_lock(&self.sweeper_cancel, SOURCE, "shutdown").take();
        self.jobs.close();
        self.jobs.wait().await;
        self.store.flush().await;
        info!("Data service stopped");
    }

    /// Stop background work and drop every cached value.
    pub async fn logout(&self) {
        self.shutdown().await;
        self.store.clear();
        self.store.flush().await;
    }
}
