use std::sync::RwLock;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::AuthContext;
use crate::lock::{rw_read, rw_write};

const SOURCE: &str = "auth::session";

/// Token lifetime in hours.
const TOKEN_EXPIRY_HOURS: i64 = 24;

/// Refresh the token this long before it expires.
const TOKEN_REFRESH_BUFFER_MINUTES: i64 = 30;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionData {
    pub token: String,
    pub user_id: Uuid,
    pub username: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl SessionData {
    pub fn new(token: impl Into<String>, user_id: Uuid) -> Self {
        Self {
            token: token.into(),
            user_id,
            username: None,
            created_at: Utc::now(),
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at()
    }

    /// Check if the session will expire soon and should be refreshed
    pub fn needs_refresh(&self) -> bool {
        Utc::now() > self.expires_at() - Duration::minutes(TOKEN_REFRESH_BUFFER_MINUTES)
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.created_at + Duration::hours(TOKEN_EXPIRY_HOURS)
    }

    /// Get minutes remaining until expiry (for display)
    pub fn minutes_until_expiry(&self) -> i64 {
        (self.expires_at() - Utc::now()).num_minutes().max(0)
    }
}

/// In-memory session shared between the app shell and the data layer.
#[derive(Debug, Default)]
pub struct Session {
    data: RwLock<Option<SessionData>>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_data(data: SessionData) -> Self {
        Self {
            data: RwLock::new(Some(data)),
        }
    }

    /// Forget the current session (logout)
    pub fn clear(&self) {
        *rw_write(&self.data, SOURCE, "clear") = None;
    }

    /// Get the bearer token if the session is valid
    pub fn token(&self) -> Option<String> {
        rw_read(&self.data, SOURCE, "token")
            .as_ref()
            .filter(|d| !d.is_expired())
            .map(|d| d.token.clone())
    }

    /// Check if session is valid (exists and not expired)
    pub fn is_valid(&self) -> bool {
        rw_read(&self.data, SOURCE, "is_valid")
            .as_ref()
            .map(|d| !d.is_expired())
            .unwrap_or(false)
    }

    pub fn data(&self) -> Option<SessionData> {
        rw_read(&self.data, SOURCE, "data").clone()
    }
}

impl AuthContext for Session {
    fn current_user_id(&self) -> Option<Uuid> {
        rw_read(&self.data, SOURCE, "current_user_id")
            .as_ref()
            .filter(|d| !d.is_expired())
            .map(|d| d.user_id)
    }
}
