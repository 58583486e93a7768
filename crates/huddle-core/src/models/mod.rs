//! Data models for Huddle entities.
//!
//! - `Activity`, `ActivityType`, `ActivityDraft`: activities and their categories
//! - `BaseUser`, `FriendRequest`: friendships
//! - `ProfileStats`, `ProfileInfo`, `SocialMedia`: profile sub-resources

pub mod activity;
pub mod user;

pub use activity::{Activity, ActivityDraft, ActivityType, Location};
pub use user::{
    BaseUser, FriendRequest, FriendRequestAction, ProfileInfo, ProfileStats, SocialMedia,
};
