//! Shared types used by the Qdrant client.

use reqwest::StatusCode;
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

/// Errors returned while interacting with Qdrant.
#[derive(Debug, Error)]
pub enum QdrantError {
    /// Base URL failed to parse or normalize.
    #[error("Invalid Qdrant URL: {0}")]
    InvalidUrl(String),
    /// HTTP layer failed before receiving a response.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// Qdrant responded with an unexpected status code.
    #[error("Unexpected Qdrant response ({status}): {body}")]
    UnexpectedStatus {
        /// HTTP status returned from Qdrant.
        status: StatusCode,
        /// Body payload associated with the failing response.
        body: String,
    },
}

/// Point body sent to `PUT /collections/{name}/points`.
#[derive(Debug, Clone, Serialize)]
pub struct PointInsert<'a> {
    /// Deterministic point id.
    pub id: &'a str,
    /// Embedding vector produced for the chunk.
    pub vector: &'a [f32],
    /// Stored payload.
    pub payload: &'a Map<String, Value>,
}
