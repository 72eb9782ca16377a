//! Split parsed pages into chunks with global indices.

use super::batch_size;
use crate::chunking::{FixedChunker, SemanticChunker, dataframe_chunks};
use crate::embedding::EmbedderRegistry;
use crate::pipeline::config::ChunkConfig;
use crate::pipeline::results::{ChunkResult, ResultKind, StageResult};
use crate::pipeline::status::Stage;
use crate::pipeline::{PipelineMessage, StageError, StageExecutor};
use async_trait::async_trait;
use std::sync::Arc;

/// Chunk stage: `ParseResult` in, `ChunkResult` out.
pub struct ChunkStage {
    embedders: Arc<EmbedderRegistry>,
    default_batch_size: usize,
}

impl ChunkStage {
    /// The semantic strategy embeds sentences through `embedders`.
    pub fn new(embedders: Arc<EmbedderRegistry>, default_batch_size: usize) -> Self {
        Self {
            embedders,
            default_batch_size,
        }
    }
}

#[async_trait]
impl StageExecutor for ChunkStage {
    fn stage(&self) -> Stage {
        Stage::Chunking
    }

    fn expects(&self) -> ResultKind {
        ResultKind::Parse
    }

    async fn execute(&self, message: &PipelineMessage) -> Result<StageResult, StageError> {
        let StageResult::Parse(parsed) = message.previous_result() else {
            return Err(StageError::State("chunk stage requires a parse result".into()));
        };
        let config = &message.pipeline_config;

        let chunks = match &config.chunk {
            ChunkConfig::Fixed(params) => FixedChunker::new(params)?.chunk_pages(&parsed.pages),
            ChunkConfig::Dataframe(_) => dataframe_chunks(&parsed.pages),
            ChunkConfig::Semantic(params) => {
                let client = self.embedders.resolve(config.embed.provider)?;
                let batch = batch_size(config.embed.batch_size, self.default_batch_size);
                SemanticChunker::new(client.as_ref(), &config.embed, batch)
                    .chunk_pages(&parsed.pages, params)
                    .await?
            }
        };

        tracing::info!(
            pipeline_id = %message.id,
            strategy = ?config.chunk.kind(),
            pages = parsed.pages.len(),
            chunks = chunks.len(),
            "Chunked pages"
        );
        Ok(StageResult::Chunk(ChunkResult { chunks }))
    }
}
