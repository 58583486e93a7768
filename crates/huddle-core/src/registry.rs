//! Cache operations registry.
//!
//! Maps every [`ResourceDescriptor`] to the endpoint it is fetched from and the
//! cache slot it lives in. The reader, writer, sweeper and scheduler all go
//! through here so key and endpoint construction lives in exactly one place.

use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use serde::{de::DeserializeOwned, Serialize};
use tracing::error;
use uuid::Uuid;

use crate::api::Parameters;
use crate::cache::{CacheEntry, CacheKey, CacheStore, FetchTicket};
use crate::error::DataError;

const ACTIVITIES_PREFIX: &str = "activities:";
const VISIBLE_SUFFIX: &str = ":visible";

/// Tag of a [`ResourceDescriptor`], used as the registry lookup key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Activities,
    ActivityDetail,
    ActivityTypes,
    Friends,
    FriendRequests,
    ProfileStats,
    ProfileInterests,
    ProfileSocialMedia,
    ProfileInfo,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 9] = [
        ResourceKind::Activities,
        ResourceKind::ActivityDetail,
        ResourceKind::ActivityTypes,
        ResourceKind::Friends,
        ResourceKind::FriendRequests,
        ResourceKind::ProfileStats,
        ResourceKind::ProfileInterests,
        ResourceKind::ProfileSocialMedia,
        ResourceKind::ProfileInfo,
    ];
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResourceKind::Activities => "activities",
            ResourceKind::ActivityDetail => "activity detail",
            ResourceKind::ActivityTypes => "activity types",
            ResourceKind::Friends => "friends",
            ResourceKind::FriendRequests => "friend requests",
            ResourceKind::ProfileStats => "profile stats",
            ResourceKind::ProfileInterests => "profile interests",
            ResourceKind::ProfileSocialMedia => "profile social media",
            ResourceKind::ProfileInfo => "profile info",
        };
        f.write_str(name)
    }
}

/// What is being read.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResourceDescriptor {
    Activities { user_id: Uuid },
    ActivityDetail { activity_id: Uuid, requesting_user_id: Uuid },
    ActivityTypes { user_id: Uuid },
    Friends { user_id: Uuid },
    FriendRequests { user_id: Uuid },
    ProfileStats { user_id: Uuid },
    ProfileInterests { user_id: Uuid },
    ProfileSocialMedia { user_id: Uuid },
    ProfileInfo { user_id: Uuid },
}

impl ResourceDescriptor {
    pub fn kind(&self) -> ResourceKind {
        match self {
            Self::Activities { .. } => ResourceKind::Activities,
            Self::ActivityDetail { .. } => ResourceKind::ActivityDetail,
            Self::ActivityTypes { .. } => ResourceKind::ActivityTypes,
            Self::Friends { .. } => ResourceKind::Friends,
            Self::FriendRequests { .. } => ResourceKind::FriendRequests,
            Self::ProfileStats { .. } => ResourceKind::ProfileStats,
            Self::ProfileInterests { .. } => ResourceKind::ProfileInterests,
            Self::ProfileSocialMedia { .. } => ResourceKind::ProfileSocialMedia,
            Self::ProfileInfo { .. } => ResourceKind::ProfileInfo,
        }
    }

    /// The slot this descriptor's data lives in. Pure: the same descriptor
    /// always yields the same key and distinct descriptors never share one.
    pub fn cache_key(&self) -> CacheKey {
        let key = match self {
            Self::Activities { user_id } => format!("{}{}", ACTIVITIES_PREFIX, user_id),
            Self::ActivityDetail {
                activity_id,
                requesting_user_id,
            } => format!("activity:{}:{}", activity_id, requesting_user_id),
            Self::ActivityTypes { user_id } => format!("activity_types:{}", user_id),
            Self::Friends { user_id } => format!("friends:{}", user_id),
            Self::FriendRequests { user_id } => format!("friend_requests:{}", user_id),
            Self::ProfileStats { user_id } => format!("profile_stats:{}", user_id),
            Self::ProfileInterests { user_id } => format!("profile_interests:{}", user_id),
            Self::ProfileSocialMedia { user_id } => format!("profile_social_media:{}", user_id),
            Self::ProfileInfo { user_id } => format!("profile_info:{}", user_id),
        };
        CacheKey::new(key)
    }
}

/// Local-only key holding the swept view of a user's activities.
pub fn visible_activities_key(user_id: Uuid) -> CacheKey {
    CacheKey::new(format!("{}{}{}", ACTIVITIES_PREFIX, user_id, VISIBLE_SUFFIX))
}

/// The user whose raw activities collection `key` addresses, if it is one.
pub fn activities_owner(key: &CacheKey) -> Option<Uuid> {
    key.as_str()
        .strip_prefix(ACTIVITIES_PREFIX)
        .and_then(|rest| Uuid::parse_str(rest).ok())
}

/// Where a descriptor is fetched from and cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub endpoint: String,
    pub parameters: Parameters,
    pub cache_key: CacheKey,
}

pub type RouteBuilder = fn(&ResourceDescriptor) -> Route;

fn default_route(descriptor: &ResourceDescriptor) -> Route {
    let mut parameters = Parameters::new();
    let endpoint = match descriptor {
        ResourceDescriptor::Activities { user_id } => format!("users/{}/activities", user_id),
        ResourceDescriptor::ActivityDetail {
            activity_id,
            requesting_user_id,
        } => {
            parameters.insert("requestingUserId".to_string(), requesting_user_id.to_string());
            format!("activities/{}", activity_id)
        }
        ResourceDescriptor::ActivityTypes { user_id } => format!("users/{}/activity-types", user_id),
        ResourceDescriptor::Friends { user_id } => format!("users/{}/friends", user_id),
        ResourceDescriptor::FriendRequests { user_id } => {
            format!("users/{}/friend-requests", user_id)
        }
        ResourceDescriptor::ProfileStats { user_id } => format!("users/{}/stats", user_id),
        ResourceDescriptor::ProfileInterests { user_id } => format!("users/{}/interests", user_id),
        ResourceDescriptor::ProfileSocialMedia { user_id } => {
            format!("users/{}/social-media", user_id)
        }
        ResourceDescriptor::ProfileInfo { user_id } => format!("users/{}/profile-info", user_id),
    };

    Route {
        endpoint,
        parameters,
        cache_key: descriptor.cache_key(),
    }
}

/// Typed handle on one cache slot plus the route that fills it.
///
/// `provide` and `update` only touch memory, so they are safe to call from
/// inside async flows without blocking on I/O.
pub struct CacheOperations<T> {
    pub endpoint: String,
    pub parameters: Parameters,
    pub cache_key: CacheKey,
    store: Arc<CacheStore>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Serialize + DeserializeOwned> CacheOperations<T> {
    pub fn provide(&self) -> Option<CacheEntry<T>> {
        self.store.get(&self.cache_key)
    }

    pub fn update(&self, value: &T) -> Result<(), serde_json::Error> {
        self.store.set(&self.cache_key, value)
    }

    pub fn begin_fetch(&self) -> FetchTicket {
        self.store.begin_fetch(&self.cache_key)
    }

    /// Commit a fetched value under the store's ordering policy.
    pub fn commit(&self, ticket: &FetchTicket, value: &T) -> Result<bool, serde_json::Error> {
        self.store.commit_fetch(ticket, value)
    }
}

pub struct Registry {
    store: Arc<CacheStore>,
    routes: HashMap<ResourceKind, RouteBuilder>,
}

impl Registry {
    /// A registry that knows no data types.
    pub fn empty(store: Arc<CacheStore>) -> Self {
        Self {
            store,
            routes: HashMap::new(),
        }
    }

    /// A registry covering every [`ResourceKind`].
    pub fn with_defaults(store: Arc<CacheStore>) -> Self {
        let mut registry = Self::empty(store);
        for kind in ResourceKind::ALL {
            registry.register(kind, default_route);
        }
        registry
    }

    pub fn register(&mut self, kind: ResourceKind, builder: RouteBuilder) {
        self.routes.insert(kind, builder);
    }

    pub fn store(&self) -> &Arc<CacheStore> {
        &self.store
    }

    pub fn route(&self, descriptor: &ResourceDescriptor) -> Result<Route, DataError> {
        let kind = descriptor.kind();
        match self.routes.get(&kind) {
            Some(builder) => Ok(builder(descriptor)),
            None => {
                error!(kind = %kind, "No cache operations registered for data type");
                Err(DataError::UnsupportedDataType(kind))
            }
        }
    }

    pub fn operations<T>(&self, descriptor: &ResourceDescriptor) -> Result<CacheOperations<T>, DataError>
    where
        T: Serialize + DeserializeOwned,
    {
        let route = self.route(descriptor)?;
        Ok(CacheOperations {
            endpoint: route.endpoint,
            parameters: route.parameters,
            cache_key: route.cache_key,
            store: Arc::clone(&self.store),
            _marker: PhantomData,
        })
    }
}
