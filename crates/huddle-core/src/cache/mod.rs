//! Local cache for remote state.
//!
//! `CacheStore` is the only shared mutable resource in the data layer. Values
//! are held as JSON in memory, optionally mirrored to disk, and every change
//! is published on a broadcast bus that consumers, the expiration sweeper and
//! the refresh scheduler subscribe to.

pub mod disk;
pub mod entry;
pub mod events;
pub mod inflight;
pub mod key;
pub mod store;

pub use entry::CacheEntry;
pub use events::{CacheEvent, CacheSubscription};
pub use inflight::{InFlight, InFlightGuard};
pub use key::CacheKey;
pub use store::{CacheStore, FetchOrdering, FetchTicket};
