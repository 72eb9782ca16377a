//! Record identity and payload construction for stored chunks.

use crate::pipeline::results::EmbeddedChunk;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Payload fields and their index types.
pub const PAYLOAD_FIELDS: [(&str, FieldType); 7] = [
    ("text", FieldType::Text),
    ("chunk_index", FieldType::Integer),
    ("source", FieldType::Keyword),
    ("page_number", FieldType::Integer),
    ("last_update_date", FieldType::Keyword),
    ("chunk_hash", FieldType::Keyword),
    ("pipeline_id", FieldType::Keyword),
];

/// Index type of a payload field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    /// Full-text field.
    Text,
    /// Exact match string.
    Keyword,
    /// Integer field.
    Integer,
}

impl FieldType {
    /// Qdrant payload schema name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Keyword => "keyword",
            Self::Integer => "integer",
        }
    }
}

/// Deterministic record id: the same message and chunk always map to the same point.
pub fn point_id(message_id: &str, chunk_index: u64) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, format!("{message_id}:{chunk_index}").as_bytes()).to_string()
}

/// Compute a deterministic SHA-256 hash for the chunk text.
pub fn compute_chunk_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let digest = hasher.finalize();
    hex::encode(digest)
}

/// Build the payload stored alongside each chunk vector.
pub(crate) fn build_payload(
    message_id: &str,
    chunk_index: u64,
    embedded: &EmbeddedChunk,
) -> Map<String, Value> {
    let chunk = &embedded.chunk;
    let mut payload = Map::new();
    payload.insert("text".into(), Value::String(chunk.text.clone()));
    payload.insert("chunk_index".into(), Value::from(chunk_index));
    payload.insert("source".into(), Value::String(chunk.metadata.source.clone()));
    payload.insert("page_number".into(), Value::from(chunk.metadata.page_number));
    payload.insert(
        "last_update_date".into(),
        Value::String(chunk.metadata.last_update_date.clone()),
    );
    payload.insert("chunk_hash".into(), Value::String(compute_chunk_hash(&chunk.text)));
    payload.insert("pipeline_id".into(), Value::String(message_id.to_string()));
    payload
}
