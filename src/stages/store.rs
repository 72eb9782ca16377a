//! Write embedded chunks to the configured vector store.

use crate::metrics::PipelineMetrics;
use crate::pipeline::results::{ResultKind, StageResult, StoreResult, StoreStatus};
use crate::pipeline::status::Stage;
use crate::pipeline::{PipelineMessage, StageError, StageExecutor};
use crate::store::{IndexSchema, StoreRegistry, VectorRecord};
use async_trait::async_trait;
use std::sync::Arc;

/// Store stage: `EmbedResult` in, `StoreResult` out. Terminal.
pub struct StoreStage {
    stores: Arc<StoreRegistry>,
    metrics: Arc<PipelineMetrics>,
}

impl StoreStage {
    /// Write through `stores`, counting upserted chunks in `metrics`.
    pub fn new(stores: Arc<StoreRegistry>, metrics: Arc<PipelineMetrics>) -> Self {
        Self { stores, metrics }
    }
}

#[async_trait]
impl StageExecutor for StoreStage {
    fn stage(&self) -> Stage {
        Stage::Storing
    }

    fn expects(&self) -> ResultKind {
        ResultKind::Embed
    }

    async fn execute(&self, message: &PipelineMessage) -> Result<StageResult, StageError> {
        let StageResult::Embed(embedded) = message.previous_result() else {
            return Err(StageError::State("store stage requires an embed result".into()));
        };
        let config = &message.pipeline_config;
        let index = &config.store.index_name;
        if index.trim().is_empty() {
            return Err(StageError::Validation("store index_name must not be empty".into()));
        }

        let schema = IndexSchema::for_chunks(config.embed.dimension);
        let store = self
            .stores
            .ensure_index_once(config.store.target, index, &schema)
            .await?;

        let records = embedded
            .chunks
            .iter()
            .enumerate()
            .map(|(position, chunk)| VectorRecord::from_chunk(&message.id, chunk, position as u64))
            .collect();
        let upserted = store.upsert(index, records).await?;
        self.metrics.record_chunks_stored(upserted as u64);

        tracing::info!(
            pipeline_id = %message.id,
            target = ?config.store.target,
            index = %index,
            upserted,
            "Stored chunks"
        );
        Ok(StageResult::Store(StoreResult {
            status: StoreStatus {
                index: index.clone(),
                upserted,
            },
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::config::StoreTargetKind;
    use crate::pipeline::executor::tests::pipeline_config;
    use crate::pipeline::results::{
        ChunkResult, EmbedResult, EmbeddedChunk, Page, PageMetadata, ParseResult,
    };
    use crate::store::{InMemoryVectorStore, VectorStore, point_id};

    fn embedded(dimension: usize) -> PipelineMessage {
        let mut message = PipelineMessage::ingest("agent", "kb", "kb/doc.txt", pipeline_config());
        message.append(StageResult::Parse(ParseResult { pages: vec![] })).unwrap();
        message.append(StageResult::Chunk(ChunkResult { chunks: vec![] })).unwrap();
        let page = Page::new(
            "",
            PageMetadata {
                source: "kb/doc.txt".into(),
                page_number: 3,
                last_update_date: "2024-01-01 00:00:00.000000".into(),
            },
        );
        let chunks = (0..3)
            .map(|i| EmbeddedChunk {
                chunk: page.to_chunk(format!("chunk {i}"), i),
                vector: vec![0.25; dimension],
            })
            .collect();
        message.append(StageResult::Embed(EmbedResult { chunks })).unwrap();
        message
    }

    fn stage(memory: Arc<InMemoryVectorStore>) -> (StoreStage, Arc<PipelineMetrics>) {
        let mut registry = StoreRegistry::new();
        registry.register(StoreTargetKind::Memory, memory);
        let metrics = Arc::new(PipelineMetrics::new());
        (StoreStage::new(Arc::new(registry), metrics.clone()), metrics)
    }

    #[tokio::test]
    async fn replaying_a_message_overwrites_records() {
        let memory = Arc::new(InMemoryVectorStore::new());
        let (stage, metrics) = stage(memory.clone());
        let message = embedded(8);

        stage.execute(&message).await.unwrap();
        let result = stage.execute(&message).await.unwrap();

        assert_eq!(memory.count("kb"), 3);
        assert_eq!(
            result,
            StageResult::Store(StoreResult {
                status: StoreStatus {
                    index: "kb".into(),
                    upserted: 3,
                },
            })
        );
        assert_eq!(metrics.snapshot().chunks_stored, 6);

        let ids: Vec<String> = memory.records("kb").into_iter().map(|r| r.id).collect();
        assert!(ids.contains(&point_id(&message.id, 2)));
    }

    #[tokio::test]
    async fn payload_carries_provenance() {
        let memory = Arc::new(InMemoryVectorStore::new());
        let (stage, _) = stage(memory.clone());
        let message = embedded(8);
        stage.execute(&message).await.unwrap();

        let record = memory
            .records("kb")
            .into_iter()
            .find(|r| r.id == point_id(&message.id, 1))
            .unwrap();
        assert_eq!(record.payload["text"], "chunk 1");
        assert_eq!(record.payload["page_number"], 3);
        assert_eq!(record.payload["source"], "kb/doc.txt");
    }

    #[tokio::test]
    async fn vectors_of_wrong_dimension_are_rejected() {
        let memory = Arc::new(InMemoryVectorStore::new());
        memory.ensure_index("kb", &IndexSchema::for_chunks(8)).await.unwrap();
        let (stage, _) = stage(memory.clone());

        let result = stage.execute(&embedded(4)).await;
        assert!(matches!(result, Err(StageError::Provider(_))));
        assert_eq!(memory.count("kb"), 0);
    }

    #[tokio::test]
    async fn unconfigured_target_is_configuration_error() {
        let (stage, _) = stage(Arc::new(InMemoryVectorStore::new()));
        let mut message = embedded(8);
        message.pipeline_config.store.target = StoreTargetKind::Qdrant;
        assert!(matches!(
            stage.execute(&message).await,
            Err(StageError::Configuration(_))
        ));
    }
}
