use thiserror::Error;

use crate::api::ApiError;
use crate::data::HttpMethod;
use crate::registry::ResourceKind;

/// Failures surfaced by the data reader, writer and service.
///
/// Only `ApiFailed` is expected during normal degraded-network operation; the
/// other kinds indicate a caller asked for something the layer cannot do.
#[derive(Error, Debug)]
pub enum DataError {
    #[error("No cached data available")]
    NoCachedData,

    #[error("No cache operations registered for data type {0}")]
    UnsupportedDataType(ResourceKind),

    #[error("Unsupported operation: {method} {context}")]
    UnsupportedOperation { method: HttpMethod, context: String },

    #[error("Invalid URL for endpoint: {0}")]
    InvalidUrl(String),

    #[error("Request body is required for this operation")]
    MissingRequestBody,

    #[error("API request failed: {0}")]
    ApiFailed(#[from] ApiError),
}

impl From<serde_json::Error> for DataError {
    fn from(e: serde_json::Error) -> Self {
        DataError::ApiFailed(ApiError::Serialization(e))
    }
}
