//! Periodic refresh of hot resources.
//!
//! Each scheduled resource gets its own task that refreshes it through the
//! reader on a fixed interval and right after it is invalidated. Refreshes
//! share the reader's in-flight set, so a tick that lands while a refresh for
//! the same key is still running is dropped rather than queued.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::auth::AuthContext;
use crate::cache::{CacheEvent, CacheKey, CacheSubscription};
use crate::data::DataReader;
use crate::error::DataError;
use crate::lock::mutex_lock;
use crate::registry::ResourceDescriptor;

const SOURCE: &str = "scheduler";

/// Default refresh interval for scheduled resources, in seconds.
pub const DEFAULT_REFRESH_INTERVAL_SECS: u64 = 300;

pub struct RefreshScheduler {
    reader: DataReader,
    auth: Arc<dyn AuthContext>,
    paused: watch::Sender<bool>,
    cancel: CancellationToken,
    tasks: TaskTracker,
    scheduled: Mutex<HashMap<CacheKey, CancellationToken>>,
}

impl RefreshScheduler {
    /// Scheduler tied to `reader`: shutting the reader down also stops it.
    pub fn new(reader: DataReader, auth: Arc<dyn AuthContext>) -> Self {
        let cancel = reader.cancellation_token().child_token();
        let (paused, _) = watch::channel(false);
        Self {
            reader,
            auth,
            paused,
            cancel,
            tasks: TaskTracker::new(),
            scheduled: Mutex::new(HashMap::new()),
        }
    }

    /// Refresh `descriptor` every `interval`, starting one interval from now.
    /// Scheduling a key again replaces its previous schedule.
    pub fn schedule<T>(&self, descriptor: ResourceDescriptor, interval: Duration) -> Result<(), DataError>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
    {
        let key = self.reader.registry().route(&descriptor)?.cache_key;
        let job_cancel = self.cancel.child_token();
        if let Some(previous) =
            mutex_lock(&self.scheduled, SOURCE, "schedule").insert(key.clone(), job_cancel.clone())
        {
            previous.cancel();
        }

        let job = ScheduledRefresh {
            reader: self.reader.clone(),
            auth: Arc::clone(&self.auth),
            paused: self.paused.subscribe(),
            events: self.reader.store().subscribe_keys([key.clone()]),
            descriptor,
            key,
        };

        info!(key = %job.key, interval_secs = interval.as_secs(), "Scheduled background refresh");
        self.tasks.spawn(job.run::<T>(interval, job_cancel));
        Ok(())
    }

    /// Stop refreshing `descriptor`. Returns whether it was scheduled.
    pub fn unschedule(&self, descriptor: &ResourceDescriptor) -> bool {
        match mutex_lock(&self.scheduled, SOURCE, "unschedule").remove(&descriptor.cache_key()) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn scheduled_keys(&self) -> Vec<CacheKey> {
        let mut keys: Vec<CacheKey> = mutex_lock(&self.scheduled, SOURCE, "scheduled_keys")
            .keys()
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    pub fn pause(&self) {
        self.paused.send_replace(true);
        debug!("Background refresh paused");
    }

    pub fn resume(&self) {
        self.paused.send_replace(false);
        debug!("Background refresh resumed");
    }

    pub fn is_paused(&self) -> bool {
        *self.paused.borrow()
    }

    /// Stop every schedule. Refreshes already running finish or are
    /// cancelled by the reader's own shutdown.
    pub fn cancel(&self) {
        self.cancel.cancel();
        mutex_lock(&self.scheduled, SOURCE, "cancel").clear();
    }

    /// Cancel and wait for the schedule tasks to exit.
    pub async fn shutdown(&self) {
        self.cancel();
        self.tasks.close();
        self.tasks.wait().await;
    }
}

struct ScheduledRefresh {
    reader: DataReader,
    auth: Arc<dyn AuthContext>,
    paused: watch::Receiver<bool>,
    events: CacheSubscription,
    descriptor: ResourceDescriptor,
    key: CacheKey,
}

impl ScheduledRefresh {
    async fn run<T>(mut self, period: Duration, cancel: CancellationToken)
    where
        T: Serialize + DeserializeOwned + Send + 'static,
    {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(key = %self.key, "Scheduled refresh stopped");
                    break;
                }
                _ = ticker.tick() => self.trigger::<T>("interval"),
                event = self.events.recv() => match event {
                    Some(CacheEvent::Invalidated { .. }) => self.trigger::<T>("invalidated"),
                    Some(_) => {}
                    None => break,
                },
            }
        }
    }

    fn trigger<T>(&self, reason: &'static str)
    where
        T: Serialize + DeserializeOwned + Send + 'static,
    {
        if *self.paused.borrow() {
            debug!(key = %self.key, reason, "Refresh paused, skipping");
            return;
        }
        if !self.auth.is_logged_in() {
            debug!(key = %self.key, reason, "No user logged in, skipping refresh");
            return;
        }

        match self.reader.spawn_refresh::<T>(&self.descriptor) {
            Ok(true) => debug!(key = %self.key, reason, "Scheduled refresh started"),
            Ok(false) => debug!(key = %self.key, reason, "Refresh still in flight, dropping tick"),
            Err(e) => warn!(key = %self.key, error = %e, "Scheduled refresh could not start"),
        }
    }
}
