//! Local expiration of activities.
//!
//! The server eventually flags finished activities with `is_expired`, but the
//! feed should not show them in the meantime. [`ExpirationRule`] decides
//! expiry locally; [`ExpirationSweeper`] keeps a filtered "visible" copy of
//! every cached activities collection up to date. The raw collection is never
//! edited, so a later fetch always starts from the server's view.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::auth::AuthContext;
use crate::cache::{CacheEvent, CacheStore};
use crate::models::Activity;
use crate::registry::{activities_owner, visible_activities_key, ResourceDescriptor};

/// Default interval between full sweeps, in seconds.
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;

/// Upper bound when walking forward out of a DST gap.
const MAX_GAP_MINUTES: i64 = 24 * 60;

/// Pure expiry decision for a single activity.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExpirationRule {
    fallback_zone: Option<Tz>,
}

impl ExpirationRule {
    /// `fallback_zone` is used for activities without a usable
    /// `client_timezone`; `None` means the device's local zone.
    pub fn new(fallback_zone: Option<Tz>) -> Self {
        Self { fallback_zone }
    }

    /// When the activity stops being visible, or `None` if it cannot be
    /// computed. Ignores the server's `is_expired` flag.
    pub fn expires_at(&self, activity: &Activity) -> Option<DateTime<Utc>> {
        if let Some(end) = activity.end_time {
            return Some(end);
        }

        let client_zone = activity.client_timezone.as_deref().and_then(|name| {
            name.parse::<Tz>()
                .map_err(|_| debug!(activity = %activity.id, zone = name, "Unknown client timezone"))
                .ok()
        });

        match client_zone.or(self.fallback_zone) {
            Some(zone) => midnight_after(activity.created_at, &zone),
            None => midnight_after(activity.created_at, &Local),
        }
    }

    pub fn is_expired(&self, activity: &Activity, now: DateTime<Utc>) -> bool {
        if activity.is_expired {
            return true;
        }
        match (activity.end_time, self.expires_at(activity)) {
            (Some(end), _) => end < now,
            (None, Some(midnight)) => now >= midnight,
            (None, None) => false,
        }
    }

    /// Non-expired activities, in their original order.
    pub fn sweep(&self, activities: &[Activity], now: DateTime<Utc>) -> Vec<Activity> {
        activities
            .iter()
            .filter(|a| !self.is_expired(a, now))
            .cloned()
            .collect()
    }
}

/// The first local midnight strictly after the local day `instant` falls on.
fn midnight_after<Z: TimeZone>(instant: DateTime<Utc>, zone: &Z) -> Option<DateTime<Utc>> {
    let day = instant.with_timezone(zone).date_naive();
    let midnight = day.succ_opt()?.and_hms_opt(0, 0, 0)?;
    resolve_local(zone, midnight)
}

/// Map a wall-clock time to an instant. Ambiguous times take the earlier
/// instant; times inside a gap move forward to the first valid minute.
fn resolve_local<Z: TimeZone>(zone: &Z, naive: NaiveDateTime) -> Option<DateTime<Utc>> {
    (0..=MAX_GAP_MINUTES).find_map(|minutes| {
        let candidate = naive + chrono::Duration::minutes(minutes);
        zone.from_local_datetime(&candidate)
            .earliest()
            .map(|dt| dt.with_timezone(&Utc))
    })
}

/// Background job maintaining `activities:{user}:visible` for every cached
/// `activities:{user}` collection.
pub struct ExpirationSweeper {
    store: Arc<CacheStore>,
    auth: Arc<dyn AuthContext>,
    rule: ExpirationRule,
}

impl ExpirationSweeper {
    pub fn new(store: Arc<CacheStore>, auth: Arc<dyn AuthContext>, rule: ExpirationRule) -> Self {
        Self { store, auth, rule }
    }

    /// Sweep every cached collection. Returns how many visible views changed.
    pub fn sweep_all(&self, now: DateTime<Utc>) -> usize {
        if !self.auth.is_logged_in() {
            debug!("No user logged in, skipping sweep");
            return 0;
        }

        self.store
            .keys()
            .iter()
            .filter_map(activities_owner)
            .filter(|user_id| self.sweep_collection(*user_id, now))
            .count()
    }

    /// Recompute one user's visible view. Writes, and so publishes an event,
    /// only when the view actually changed.
    pub fn sweep_collection(&self, user_id: Uuid, now: DateTime<Utc>) -> bool {
        let raw_key = ResourceDescriptor::Activities { user_id }.cache_key();
        let Some(raw) = self.store.get::<Vec<Activity>>(&raw_key) else {
            return false;
        };

        let visible = self.rule.sweep(&raw.value, now);
        let visible_key = visible_activities_key(user_id);
        if let Some(current) = self.store.get::<Vec<Activity>>(&visible_key) {
            if current.value == visible {
                return false;
            }
        }

        match self.store.set(&visible_key, &visible) {
            Ok(()) => {
                debug!(
                    key = %visible_key,
                    hidden = raw.value.len() - visible.len(),
                    "Updated visible activities"
                );
                true
            }
            Err(e) => {
                warn!(key = %visible_key, error = %e, "Failed to store visible activities");
                false
            }
        }
    }

    fn drop_visible(&self, user_id: Uuid) {
        if self.store.remove(&visible_activities_key(user_id)) {
            debug!(user = %user_id, "Dropped visible activities with their source");
        }
    }

    /// Run until `cancel` fires: a full sweep every interval, plus an
    /// immediate pass whenever a raw collection changes.
    pub async fn run(self, interval: Duration, cancel: CancellationToken) {
        let mut events = self.store.subscribe();
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Expiration sweeper stopped");
                    break;
                }
                _ = ticker.tick() => {
                    self.sweep_all(Utc::now());
                }
                event = events.recv() => match event {
                    Some(CacheEvent::Updated { key }) => {
                        if let Some(user_id) = activities_owner(&key) {
                            if self.auth.is_logged_in() {
                                self.sweep_collection(user_id, Utc::now());
                            }
                        }
                    }
                    Some(CacheEvent::Removed { key }) | Some(CacheEvent::Invalidated { key }) => {
                        if let Some(user_id) = activities_owner(&key) {
                            self.drop_visible(user_id);
                        }
                    }
                    Some(CacheEvent::Cleared) => {}
                    None => break,
                },
            }
        }
    }

    pub fn spawn(
        self,
        interval: Duration,
        cancel: CancellationToken,
        tasks: &TaskTracker,
    ) -> JoinHandle<()> {
        tasks.spawn(self.run(interval, cancel))
    }
}
