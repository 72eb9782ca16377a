//! Vector store seam, backend registry and index bootstrap cache.

mod memory;
pub mod payload;

pub use memory::InMemoryVectorStore;
pub use payload::{FieldType, PAYLOAD_FIELDS, compute_chunk_hash, point_id};

use crate::config::Config;
use crate::pipeline::config::{Discriminator, StoreTargetKind};
use crate::pipeline::results::EmbeddedChunk;
use crate::qdrant::{QdrantError, QdrantService};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use thiserror::Error;

/// Errors raised by vector store backends.
#[derive(Debug, Error)]
pub enum VectorStoreError {
    /// Backend not configured in this deployment.
    #[error("vector store unavailable: {0}")]
    Unavailable(String),
    /// Upsert into an index that was never ensured.
    #[error("index '{0}' does not exist")]
    IndexMissing(String),
    /// Vector size does not match the index.
    #[error("index '{index}' expects vectors of dimension {expected}, got {actual}")]
    DimensionMismatch {
        /// Index name.
        index: String,
        /// Dimension of the index.
        expected: usize,
        /// Dimension supplied.
        actual: usize,
    },
    /// Qdrant request failed.
    #[error(transparent)]
    Qdrant(#[from] QdrantError),
}

/// Shape of an index: vector size plus typed payload fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSchema {
    /// Vector dimension.
    pub dimension: usize,
    /// Payload fields to index.
    pub fields: Vec<(&'static str, FieldType)>,
}

impl IndexSchema {
    /// The chunk schema for vectors of `dimension`.
    pub fn for_chunks(dimension: usize) -> Self {
        Self {
            dimension,
            fields: PAYLOAD_FIELDS.to_vec(),
        }
    }
}

/// One stored chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorRecord {
    /// Deterministic id, see [`point_id`].
    pub id: String,
    /// Embedding vector.
    pub vector: Vec<f32>,
    /// Stored fields.
    pub payload: Map<String, Value>,
}

impl VectorRecord {
    /// Record for one embedded chunk of message `message_id`.
    pub fn from_chunk(message_id: &str, embedded: &EmbeddedChunk, fallback_index: u64) -> Self {
        let chunk_index = embedded.chunk.chunk_index.unwrap_or(fallback_index);
        Self {
            id: point_id(message_id, chunk_index),
            vector: embedded.vector.clone(),
            payload: payload::build_payload(message_id, chunk_index, embedded),
        }
    }
}

/// Interface implemented by vector stores.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Create the index if missing. Idempotent.
    async fn ensure_index(&self, name: &str, schema: &IndexSchema) -> Result<(), VectorStoreError>;

    /// Insert or overwrite records by id; returns the number written.
    async fn upsert(
        &self,
        name: &str,
        records: Vec<VectorRecord>,
    ) -> Result<usize, VectorStoreError>;
}

/// Stores available in this deployment plus the set of indexes already ensured by this process.
#[derive(Default)]
pub struct StoreRegistry {
    stores: HashMap<StoreTargetKind, Arc<dyn VectorStore>>,
    ensured: RwLock<HashSet<(StoreTargetKind, String)>>,
}

impl StoreRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the in-memory store, and Qdrant when `QDRANT_URL` is set.
    pub fn from_config(config: &Config) -> Result<Self, VectorStoreError> {
        let mut registry = Self::new();
        registry.register(StoreTargetKind::Memory, Arc::new(InMemoryVectorStore::new()));
        if let Some(url) = config.qdrant_url.as_deref() {
            let service = QdrantService::new(url, config.qdrant_api_key.clone())?;
            registry.register(StoreTargetKind::Qdrant, Arc::new(service));
        }
        Ok(registry)
    }

    /// Add or replace a backend.
    pub fn register(&mut self, kind: StoreTargetKind, store: Arc<dyn VectorStore>) {
        self.stores.insert(kind, store);
    }

    /// Look up a backend.
    pub fn resolve(&self, kind: StoreTargetKind) -> Result<Arc<dyn VectorStore>, VectorStoreError> {
        self.stores.get(&kind).cloned().ok_or_else(|| {
            VectorStoreError::Unavailable(format!("target '{}' is not configured", kind.as_str()))
        })
    }

    /// Ensure `name` exists on `kind`, at most once per process.
    pub async fn ensure_index_once(
        &self,
        kind: StoreTargetKind,
        name: &str,
        schema: &IndexSchema,
    ) -> Result<Arc<dyn VectorStore>, VectorStoreError> {
        let store = self.resolve(kind)?;
        let key = (kind, name.to_string());
        let known = self
            .ensured
            .read()
            .map(|guard| guard.contains(&key))
            .unwrap_or(false);
        if !known {
            store.ensure_index(name, schema).await?;
            if let Ok(mut guard) = self.ensured.write() {
                guard.insert(key);
            }
            tracing::info!(
                target_kind = kind.as_str(),
                index = name,
                dimension = schema.dimension,
                "Index ensured"
            );
        }
        Ok(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingStore {
        ensures: AtomicUsize,
    }

    #[async_trait]
    impl VectorStore for CountingStore {
        async fn ensure_index(
            &self,
            _name: &str,
            _schema: &IndexSchema,
        ) -> Result<(), VectorStoreError> {
            self.ensures.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn upsert(
            &self,
            _name: &str,
            records: Vec<VectorRecord>,
        ) -> Result<usize, VectorStoreError> {
            Ok(records.len())
        }
    }

    fn record(id: &str, vector: Vec<f32>) -> VectorRecord {
        VectorRecord {
            id: id.into(),
            vector,
            payload: Map::new(),
        }
    }

    #[tokio::test]
    async fn ensure_index_runs_once_per_index() {
        let counting = Arc::new(CountingStore::default());
        let mut registry = StoreRegistry::new();
        registry.register(StoreTargetKind::Memory, counting.clone());
        let schema = IndexSchema::for_chunks(4);

        registry.ensure_index_once(StoreTargetKind::Memory, "kb", &schema).await.unwrap();
        registry.ensure_index_once(StoreTargetKind::Memory, "kb", &schema).await.unwrap();
        registry.ensure_index_once(StoreTargetKind::Memory, "other", &schema).await.unwrap();

        assert_eq!(counting.ensures.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn memory_upsert_overwrites_by_id() {
        let store = InMemoryVectorStore::new();
        store.ensure_index("kb", &IndexSchema::for_chunks(2)).await.unwrap();

        store
            .upsert("kb", vec![record("a", vec![0.0, 1.0]), record("b", vec![1.0, 0.0])])
            .await
            .unwrap();
        store.upsert("kb", vec![record("a", vec![0.5, 0.5])]).await.unwrap();

        assert_eq!(store.count("kb"), 2);
        assert_eq!(store.records("kb")[0].vector, vec![0.5, 0.5]);
    }

    #[tokio::test]
    async fn memory_store_rejects_wrong_dimension() {
        let store = InMemoryVectorStore::new();
        store.ensure_index("kb", &IndexSchema::for_chunks(2)).await.unwrap();
        assert!(matches!(
            store.upsert("kb", vec![record("a", vec![1.0])]).await,
            Err(VectorStoreError::DimensionMismatch { .. })
        ));
        assert!(matches!(
            store.upsert("missing", vec![]).await,
            Err(VectorStoreError::IndexMissing(_))
        ));
    }

    #[test]
    fn qdrant_target_requires_url() {
        let config = Config::from_vars(crate::config::tests::base_vars()).unwrap();
        let registry = StoreRegistry::from_config(&config).unwrap();
        assert!(registry.resolve(StoreTargetKind::Memory).is_ok());
        assert!(matches!(
            registry.resolve(StoreTargetKind::Qdrant),
            Err(VectorStoreError::Unavailable(_))
        ));
    }
}
