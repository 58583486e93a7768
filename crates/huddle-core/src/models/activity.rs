use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A scheduled get-together created by a user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    pub id: Uuid,
    pub title: Option<String>,
    pub creator_user_id: Uuid,
    pub activity_type_id: Option<Uuid>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    /// IANA zone the creator's device was in, e.g. "America/Toronto"
    pub client_timezone: Option<String>,
    /// Set by the server once it has expired the activity
    #[serde(default)]
    pub is_expired: bool,
    pub location: Option<Location>,
    pub participant_limit: Option<u32>,
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
}

impl Activity {
    pub fn display_title(&self) -> &str {
        self.title.as_deref().unwrap_or("Untitled activity")
    }

    /// Compact start time for list rows: "Jan 26 17:00"
    pub fn formatted_start(&self) -> String {
        match self.start_time {
            Some(start) => start.format("%b %d %H:%M").to_string(),
            None => "Now".to_string(),
        }
    }
}

/// A category activities are grouped under (e.g. "Coffee", "Run").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityType {
    pub id: Uuid,
    pub title: String,
    pub icon: Option<String>,
    #[serde(default)]
    pub is_pinned: bool,
    #[serde(default)]
    pub order_num: i32,
}

/// Request body for creating or editing an activity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityDraft {
    pub title: Option<String>,
    pub activity_type_id: Option<Uuid>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub client_timezone: Option<String>,
    pub location: Option<Location>,
    pub participant_limit: Option<u32>,
    pub note: Option<String>,
}

/// Minimal activity for tests elsewhere in the crate.
#[cfg(test)]
pub(crate) fn sample_activity(
    id: u128,
    created_at: DateTime<Utc>,
    end_time: Option<DateTime<Utc>>,
) -> Activity {
    Activity {
        id: Uuid::from_u128(id),
        title: Some(format!("Activity {}", id)),
        creator_user_id: Uuid::from_u128(1),
        activity_type_id: None,
        start_time: Some(created_at),
        end_time,
        created_at,
        client_timezone: None,
        is_expired: false,
        location: None,
        participant_limit: None,
        note: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_activity_parses_server_json() {
        let json = r#"{
            "id": "6f1a1b5e-58a4-4c9f-9a65-3d1e4b7e2c10",
            "title": "Morning run",
            "creatorUserId": "0b6f8f5c-2d3a-4f52-8f5e-6a6f3f0d4a11",
            "activityTypeId": null,
            "startTime": "2024-01-01T14:00:00Z",
            "endTime": null,
            "createdAt": "2024-01-01T13:00:00Z",
            "clientTimezone": "America/Toronto",
            "isExpired": false,
            "location": {"name": "Park", "latitude": 43.6, "longitude": -79.4},
            "participantLimit": 4,
            "note": null
        }"#;

        let activity: Activity = serde_json::from_str(json).expect("Failed to parse activity");
        assert_eq!(activity.display_title(), "Morning run");
        assert_eq!(activity.client_timezone.as_deref(), Some("America/Toronto"));
        assert!(activity.end_time.is_none());
        assert_eq!(activity.formatted_start(), "Jan 01 14:00");
    }

    #[test]
    fn test_is_expired_defaults_to_false() {
        let json = r#"{
            "id": "6f1a1b5e-58a4-4c9f-9a65-3d1e4b7e2c10",
            "title": null,
            "creatorUserId": "0b6f8f5c-2d3a-4f52-8f5e-6a6f3f0d4a11",
            "activityTypeId": null,
            "startTime": null,
            "endTime": null,
            "createdAt": "2024-01-01T13:00:00Z",
            "clientTimezone": null,
            "location": null,
            "participantLimit": null,
            "note": null
        }"#;

        let activity: Activity = serde_json::from_str(json).expect("Failed to parse activity");
        assert!(!activity.is_expired);
        assert_eq!(activity.display_title(), "Untitled activity");
        assert_eq!(activity.formatted_start(), "Now");
    }
}
