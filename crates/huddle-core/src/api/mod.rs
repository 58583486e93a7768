//! REST transport for the Huddle API.
//!
//! This module provides the `Transport` trait the data layer talks to, the
//! reqwest-backed `HttpTransport`, and the `ApiError` taxonomy shared by both.

pub mod client;
pub mod error;
pub mod transport;

#[cfg(test)]
pub(crate) mod mock;

pub use client::{HttpTransport, DEFAULT_REQUEST_TIMEOUT_SECS};
pub use error::ApiError;
pub use transport::{endpoint_url, with_query, Parameters, Transport};
