use super::{IndexSchema, VectorRecord, VectorStore, VectorStoreError};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

#[derive(Debug)]
struct MemoryIndex {
    dimension: usize,
    records: BTreeMap<String, VectorRecord>,
}

/// Process-local vector store keyed by record id.
#[derive(Debug, Default)]
pub struct InMemoryVectorStore {
    indexes: RwLock<HashMap<String, MemoryIndex>>,
}

impl InMemoryVectorStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records in `index`.
    pub fn count(&self, index: &str) -> usize {
        self.indexes
            .read()
            .ok()
            .and_then(|guard| guard.get(index).map(|index| index.records.len()))
            .unwrap_or(0)
    }

    /// Snapshot of every record in `index`, ordered by id.
    pub fn records(&self, index: &str) -> Vec<VectorRecord> {
        self.indexes
            .read()
            .ok()
            .and_then(|guard| {
                guard
                    .get(index)
                    .map(|index| index.records.values().cloned().collect())
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn ensure_index(&self, name: &str, schema: &IndexSchema) -> Result<(), VectorStoreError> {
        let mut guard = self
            .indexes
            .write()
            .map_err(|_| VectorStoreError::Unavailable("store lock poisoned".into()))?;
        let index = guard.entry(name.to_string()).or_insert_with(|| MemoryIndex {
            dimension: schema.dimension,
            records: BTreeMap::new(),
        });
        if index.dimension != schema.dimension {
            return Err(VectorStoreError::DimensionMismatch {
                index: name.to_string(),
                expected: index.dimension,
                actual: schema.dimension,
            });
        }
        Ok(())
    }

    async fn upsert(
        &self,
        name: &str,
        records: Vec<VectorRecord>,
    ) -> Result<usize, VectorStoreError> {
        let mut guard = self
            .indexes
            .write()
            .map_err(|_| VectorStoreError::Unavailable("store lock poisoned".into()))?;
        let index = guard
            .get_mut(name)
            .ok_or_else(|| VectorStoreError::IndexMissing(name.to_string()))?;

        if let Some(record) = records.iter().find(|record| record.vector.len() != index.dimension) {
            return Err(VectorStoreError::DimensionMismatch {
                index: name.to_string(),
                expected: index.dimension,
                actual: record.vector.len(),
            });
        }

        let count = records.len();
        for record in records {
            index.records.insert(record.id.clone(), record);
        }
        Ok(count)
    }
}
