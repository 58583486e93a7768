//! Core library for huddle.
//!
//! Client-side data access for the Huddle API: a typed cache with change
//! notifications, policy-driven reads, invalidating writes, local expiration
//! of activities, and scheduled background refresh.

pub mod api;
pub mod auth;
pub mod cache;
pub mod config;
pub mod data;
pub mod error;
pub mod models;
pub mod registry;
pub mod scheduler;
pub mod sweeper;

mod lock;

pub use api::{ApiError, HttpTransport, Transport};
pub use auth::{AuthContext, Session, SessionData};
pub use cache::{CacheEvent, CacheKey, CacheStore, FetchOrdering};
pub use config::Config;
pub use data::{CachePolicy, DataResult, DataService, DataSource, HttpMethod, WriteOperation};
pub use error::DataError;
pub use registry::{ResourceDescriptor, ResourceKind};
pub use scheduler::RefreshScheduler;
pub use sweeper::{ExpirationRule, ExpirationSweeper};
