//! Error types for response deserialization and schema resolution.

use thiserror::Error;

/// Errors during deserialization or schema cache operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid schema argument: expected an object with a top-level \"properties\" node or a resolver function, got {actual}")]
    InvalidSchema { actual: String },

    #[error("no mapping for field \"{field}\" at {path}")]
    UnknownField { path: String, field: String },

    #[error("invalid range bound at {path}: expected integer, got {actual}")]
    InvalidRangeBound { path: String, actual: String },

    #[error("empty range at {path}: gte {gte} is greater than lte {lte}")]
    EmptyRange {
        path: String,
        gte: String,
        lte: String,
    },

    #[error("no schema found for collection \"{collection}\"")]
    UnknownCollection { collection: String },

    #[error("schema fetch failed: {message}")]
    Fetch { message: String },

    #[cfg(feature = "remote")]
    #[error("failed to fetch {url}: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("invalid JSON in schema payload: {source}")]
    InvalidJson {
        #[source]
        source: serde_json::Error,
    },
}
