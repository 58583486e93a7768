//! Mutations sent to the API, and the cache keys each one makes stale.

use std::fmt;

use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

use crate::api::Parameters;
use crate::cache::CacheKey;
use crate::models::{ActivityDraft, FriendRequestAction, ProfileInfo};
use crate::registry::ResourceDescriptor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    /// Methods that must carry a request body.
    pub fn requires_body(self) -> bool {
        matches!(self, HttpMethod::Post | HttpMethod::Put | HttpMethod::Patch)
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        };
        f.write_str(s)
    }
}

/// A write request plus the keys to evict once it succeeds.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteOperation<B> {
    pub method: HttpMethod,
    pub endpoint: String,
    pub body: Option<B>,
    pub parameters: Parameters,
    pub cache_invalidation_keys: Vec<CacheKey>,
}

impl<B> WriteOperation<B> {
    pub fn new(method: HttpMethod, endpoint: impl Into<String>) -> Self {
        Self {
            method,
            endpoint: endpoint.into(),
            body: None,
            parameters: Parameters::new(),
            cache_invalidation_keys: Vec::new(),
        }
    }

    pub fn with_body(mut self, body: B) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.parameters.insert(name.into(), value.to_string());
        self
    }

    pub fn invalidating(mut self, keys: impl IntoIterator<Item = CacheKey>) -> Self {
        self.cache_invalidation_keys.extend(keys);
        self
    }
}

// ============================================================================
// Builders for the app's mutations
// ============================================================================

fn activities_key(user_id: Uuid) -> CacheKey {
    ResourceDescriptor::Activities { user_id }.cache_key()
}

fn activity_detail_key(activity_id: Uuid, user_id: Uuid) -> CacheKey {
    ResourceDescriptor::ActivityDetail {
        activity_id,
        requesting_user_id: user_id,
    }
    .cache_key()
}

pub fn create_activity(user_id: Uuid, draft: ActivityDraft) -> WriteOperation<ActivityDraft> {
    WriteOperation::new(HttpMethod::Post, "activities")
        .with_parameter("creatorUserId", user_id)
        .with_body(draft)
        .invalidating([activities_key(user_id)])
}

pub fn update_activity(
    user_id: Uuid,
    activity_id: Uuid,
    draft: ActivityDraft,
) -> WriteOperation<ActivityDraft> {
    WriteOperation::new(HttpMethod::Put, format!("activities/{}", activity_id))
        .with_parameter("requestingUserId", user_id)
        .with_body(draft)
        .invalidating([
            activities_key(user_id),
            activity_detail_key(activity_id, user_id),
        ])
}

pub fn delete_activity(user_id: Uuid, activity_id: Uuid) -> WriteOperation<()> {
    WriteOperation::new(HttpMethod::Delete, format!("activities/{}", activity_id))
        .with_parameter("requestingUserId", user_id)
        .invalidating([
            activities_key(user_id),
            activity_detail_key(activity_id, user_id),
        ])
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FriendRequestBody {
    pub sender_user_id: Uuid,
    pub receiver_user_id: Uuid,
}

pub fn send_friend_request(user_id: Uuid, friend_id: Uuid) -> WriteOperation<FriendRequestBody> {
    WriteOperation::new(HttpMethod::Post, "friend-requests")
        .with_body(FriendRequestBody {
            sender_user_id: user_id,
            receiver_user_id: friend_id,
        })
        .invalidating([ResourceDescriptor::FriendRequests { user_id }.cache_key()])
}

/// Accepting changes both the pending list and the friend list.
pub fn respond_to_friend_request(
    user_id: Uuid,
    request_id: Uuid,
    action: FriendRequestAction,
) -> WriteOperation<serde_json::Value> {
    let mut keys = vec![ResourceDescriptor::FriendRequests { user_id }.cache_key()];
    if action == FriendRequestAction::Accept {
        keys.push(ResourceDescriptor::Friends { user_id }.cache_key());
    }

    WriteOperation::new(HttpMethod::Patch, format!("friend-requests/{}", request_id))
        .with_body(json!({ "action": action }))
        .invalidating(keys)
}

pub fn update_profile_info(user_id: Uuid, info: ProfileInfo) -> WriteOperation<ProfileInfo> {
    WriteOperation::new(HttpMethod::Put, format!("users/{}/profile-info", user_id))
        .with_body(info)
        .invalidating([ResourceDescriptor::ProfileInfo { user_id }.cache_key()])
}
