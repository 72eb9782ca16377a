//! Attach an embedding vector to every chunk.

use super::batch_size;
use crate::embedding::{EmbedderRegistry, embed_in_batches};
use crate::pipeline::results::{EmbedResult, EmbeddedChunk, ResultKind, StageResult};
use crate::pipeline::status::Stage;
use crate::pipeline::{PipelineMessage, StageError, StageExecutor};
use async_trait::async_trait;
use std::sync::Arc;

/// Embed stage: `ChunkResult` in, `EmbedResult` out.
pub struct EmbedStage {
    embedders: Arc<EmbedderRegistry>,
    default_batch_size: usize,
}

impl EmbedStage {
    /// Resolve providers from `embedders`; requests carry `default_batch_size` texts unless the
    /// message overrides it.
    pub fn new(embedders: Arc<EmbedderRegistry>, default_batch_size: usize) -> Self {
        Self {
            embedders,
            default_batch_size,
        }
    }
}

#[async_trait]
impl StageExecutor for EmbedStage {
    fn stage(&self) -> Stage {
        Stage::Embedding
    }

    fn expects(&self) -> ResultKind {
        ResultKind::Chunk
    }

    async fn execute(&self, message: &PipelineMessage) -> Result<StageResult, StageError> {
        let StageResult::Chunk(chunked) = message.previous_result() else {
            return Err(StageError::State("embed stage requires a chunk result".into()));
        };
        let embed = &message.pipeline_config.embed;
        let client = self.embedders.resolve(embed.provider)?;

        let texts: Vec<String> = chunked.chunks.iter().map(|chunk| chunk.text.clone()).collect();
        let batch = batch_size(embed.batch_size, self.default_batch_size);
        let vectors =
            embed_in_batches(client.as_ref(), &embed.model, embed.dimension, &texts, batch)
                .await?;

        let chunks = chunked
            .chunks
            .iter()
            .cloned()
            .zip(vectors)
            .map(|(chunk, vector)| EmbeddedChunk { chunk, vector })
            .collect::<Vec<_>>();

        tracing::info!(
            pipeline_id = %message.id,
            provider = ?embed.provider,
            model = %embed.model,
            chunks = chunks.len(),
            "Embedded chunks"
        );
        Ok(StageResult::Embed(EmbedResult { chunks }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::OpenAiEmbeddingClient;
    use crate::embedding::tests::FixedClient;
    use crate::pipeline::Execution;
    use crate::pipeline::config::EmbeddingProviderKind;
    use crate::pipeline::executor::tests::pipeline_config;
    use crate::pipeline::results::{ChunkResult, Page, PageMetadata, ParseResult};

    fn chunked(count: usize) -> PipelineMessage {
        let mut message = PipelineMessage::ingest("agent", "kb", "kb/doc.txt", pipeline_config());
        message.append(StageResult::Parse(ParseResult { pages: vec![] })).unwrap();
        let page = Page::new(
            "",
            PageMetadata {
                source: "kb/doc.txt".into(),
                page_number: 0,
                last_update_date: "2024-01-01 00:00:00.000000".into(),
            },
        );
        let chunks = (0..count)
            .map(|i| page.to_chunk(format!("chunk {i}"), i as u64))
            .collect();
        message.append(StageResult::Chunk(ChunkResult { chunks })).unwrap();
        message
    }

    fn stage_with(client: Arc<FixedClient>, default_batch_size: usize) -> EmbedStage {
        let mut registry = EmbedderRegistry::new();
        registry.register(EmbeddingProviderKind::Hash, client);
        EmbedStage::new(Arc::new(registry), default_batch_size)
    }

    #[tokio::test]
    async fn embeds_every_chunk_in_batches() {
        let client = Arc::new(FixedClient::new(8));
        let mut message = chunked(5);
        message.pipeline_config.embed.batch_size = Some(2);

        let result = stage_with(client.clone(), 96).execute(&message).await.unwrap();
        let StageResult::Embed(embedded) = result else {
            panic!("expected embed result");
        };
        assert_eq!(embedded.chunks.len(), 5);
        assert_eq!(embedded.chunks[4].chunk.chunk_index, Some(4));
        assert!(embedded.chunks.iter().all(|c| c.vector.len() == 8));
        assert_eq!(*client.batches.lock().unwrap(), vec![2, 2, 1]);
    }

    #[tokio::test]
    async fn dimension_mismatch_fails_without_appending() {
        let client = Arc::new(FixedClient::new(4));
        let message = chunked(3);
        let stage = stage_with(client, 96);

        let mut execution = Execution::new(message, &stage);
        let status = execution.invoke().await;
        assert!(!status.is_completed());
        assert!(status.error.as_deref().unwrap().starts_with("provider error"));
        assert_eq!(execution.message().results.len(), 3);
    }

    #[tokio::test]
    async fn unknown_provider_is_configuration_error() {
        let mut message = chunked(1);
        message.pipeline_config.embed.provider = EmbeddingProviderKind::Ollama;
        assert!(matches!(
            stage_with(Arc::new(FixedClient::new(8)), 96).execute(&message).await,
            Err(StageError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn unreachable_provider_is_provider_error() {
        let client = OpenAiEmbeddingClient::new("sk-test", "http://127.0.0.1:9/v1").unwrap();
        let mut registry = EmbedderRegistry::new();
        registry.register(EmbeddingProviderKind::OpenAi, Arc::new(client));
        let stage = EmbedStage::new(Arc::new(registry), 96);

        let mut message = chunked(2);
        message.pipeline_config.embed.provider = EmbeddingProviderKind::OpenAi;
        assert!(matches!(stage.execute(&message).await, Err(StageError::Provider(_))));
    }
}
