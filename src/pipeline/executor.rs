//! The stage contract shared by every handler.

use super::message::{PipelineMessage, SequenceError};
use super::results::{ResultKind, StageResult};
use super::router::{QueueId, RouteError, Router};
use super::status::{Stage, StageStatus, StatusIdentity};
use async_trait::async_trait;
use thiserror::Error;

/// Why a stage attempt failed. The display string becomes the status `error`.
#[derive(Debug, Error)]
pub enum StageError {
    /// Message or strategy parameters are invalid.
    #[error("validation error: {0}")]
    Validation(String),
    /// The source document could not be fetched or parsed.
    #[error("extraction error: {0}")]
    Extraction(String),
    /// An external provider (embeddings, vector store, partitioner) failed.
    #[error("provider error: {0}")]
    Provider(String),
    /// The message is not in a state this stage accepts.
    #[error("state error: {0}")]
    State(String),
    /// The message selects a strategy this deployment cannot honour.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl From<SequenceError> for StageError {
    fn from(error: SequenceError) -> Self {
        Self::State(error.to_string())
    }
}

/// One pipeline stage.
#[async_trait]
pub trait StageExecutor: Send + Sync {
    /// Stage reported in status events.
    fn stage(&self) -> Stage;

    /// Result kind this stage consumes.
    fn expects(&self) -> ResultKind;

    /// Compute this stage's result from the message. Must not mutate external state other than
    /// through idempotent writes.
    async fn execute(&self, message: &PipelineMessage) -> Result<StageResult, StageError>;
}

/// A single stage attempt over one message.
pub struct Execution<'a> {
    message: PipelineMessage,
    executor: &'a dyn StageExecutor,
    completed: bool,
}

impl<'a> Execution<'a> {
    /// Pair a decoded message with the executor that will handle it.
    pub fn new(message: PipelineMessage, executor: &'a dyn StageExecutor) -> Self {
        Self {
            message,
            executor,
            completed: false,
        }
    }

    /// The message, including any result appended by [`Execution::invoke`].
    pub fn message(&self) -> &PipelineMessage {
        &self.message
    }

    /// Last result of the message, rejected when it is not what this stage consumes.
    pub fn previous_result(&self) -> Result<&StageResult, StageError> {
        previous_result(&self.message, self.executor.expects())
    }

    /// Run the stage once. On success exactly one result is appended; on failure the message is
    /// left as it was received.
    pub async fn invoke(&mut self) -> StageStatus {
        let stage = self.executor.stage();
        let identity = self.identity();

        let outcome = match self.previous_result() {
            Ok(_) => self.executor.execute(&self.message).await,
            Err(error) => Err(error),
        };

        let appended = outcome.and_then(|result| {
            let serialized = serde_json::to_string(&result).map_err(|error| {
                StageError::Validation(format!(
                    "failed to serialize {} result: {error}",
                    result.kind()
                ))
            })?;
            self.message.append(result)?;
            Ok(serialized)
        });

        match appended {
            Ok(serialized) => {
                self.completed = true;
                tracing::info!(
                    pipeline_id = %self.message.id,
                    stage = %stage,
                    results = self.message.results.len(),
                    "Stage completed"
                );
                StageStatus::completed(identity, stage, serialized)
            }
            Err(error) => {
                tracing::warn!(
                    pipeline_id = %self.message.id,
                    stage = %stage,
                    error = %error,
                    "Stage failed"
                );
                StageStatus::failed(identity, stage, error.to_string())
            }
        }
    }

    /// Forward the updated message to the next stage queue.
    pub async fn next(&self, router: &Router) -> Result<Option<QueueId>, RouteError> {
        if !self.completed {
            return Err(RouteError::NotCompleted(self.message.id.clone()));
        }
        router.forward(&self.message).await
    }

    fn identity(&self) -> StatusIdentity {
        StatusIdentity {
            pipeline_id: self.message.id.clone(),
            agent_id: self.message.agent_id.clone(),
            knowledge_base_id: self.message.knowledge_base_id.clone(),
        }
    }
}

/// Shared check used by executors and [`Execution`].
pub fn previous_result(
    message: &PipelineMessage,
    expected: ResultKind,
) -> Result<&StageResult, StageError> {
    let last = message.previous_result();
    if last.kind() == expected {
        Ok(last)
    } else {
        Err(StageError::State(format!(
            "expected a {expected} result, found {}",
            last.kind()
        )))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::pipeline::config::{
        ChunkConfig, DataframeChunkConfig, EmbedConfig, EmbeddingProviderKind, ParseConfig,
        PipelineConfig, StoreConfig, StoreTargetKind,
    };
    use crate::pipeline::results::{
        ChunkResult, Page, PageMetadata, ParseResult,
    };
    use crate::pipeline::router::{MemoryQueue, tests::test_routes};
    use crate::pipeline::status::ExecutionState;
    use std::sync::Arc;

    pub(crate) fn pipeline_config() -> PipelineConfig {
        PipelineConfig {
            parse: ParseConfig::default(),
            chunk: ChunkConfig::Dataframe(DataframeChunkConfig::default()),
            embed: EmbedConfig {
                provider: EmbeddingProviderKind::Hash,
                model: "hash".into(),
                dimension: 8,
                batch_size: None,
            },
            store: StoreConfig {
                target: StoreTargetKind::Memory,
                index_name: "kb".into(),
            },
        }
    }

    /// Parses every source into one fixed page, or fails when told to.
    pub(crate) struct StubParse {
        pub(crate) fail: bool,
    }

    #[async_trait]
    impl StageExecutor for StubParse {
        fn stage(&self) -> Stage {
            Stage::Extraction
        }

        fn expects(&self) -> ResultKind {
            ResultKind::Source
        }

        async fn execute(&self, message: &PipelineMessage) -> Result<StageResult, StageError> {
            if self.fail {
                return Err(StageError::Extraction("corrupt document".into()));
            }
            let key = message.results.source().map(|s| s.key.clone()).unwrap_or_default();
            Ok(StageResult::Parse(ParseResult {
                pages: vec![Page::new(
                    "content",
                    PageMetadata {
                        source: key,
                        page_number: 0,
                        last_update_date: "2024-01-01 00:00:00.000000".into(),
                    },
                )],
            }))
        }
    }

    #[tokio::test]
    async fn completed_invoke_appends_exactly_one_result() {
        let executor = StubParse { fail: false };
        let message = PipelineMessage::ingest("agent", "kb", "a.txt", pipeline_config());
        let mut execution = Execution::new(message, &executor);

        let status = execution.invoke().await;
        assert!(status.is_completed());
        assert_eq!(status.stage, Stage::Extraction);
        assert_eq!(execution.message().results.len(), 2);
        let results: StageResult =
            serde_json::from_str(status.results.as_deref().unwrap()).unwrap();
        assert_eq!(results.kind(), ResultKind::Parse);
    }

    #[tokio::test]
    async fn failed_invoke_leaves_results_untouched() {
        let executor = StubParse { fail: true };
        let message = PipelineMessage::ingest("agent", "kb", "a.txt", pipeline_config());
        let before = message.results.clone();
        let mut execution = Execution::new(message, &executor);

        let status = execution.invoke().await;
        assert_eq!(status.execution_state, ExecutionState::Failed);
        assert!(status.error.as_deref().unwrap().contains("corrupt document"));
        assert_eq!(execution.message().results, before);
    }

    #[tokio::test]
    async fn wrong_previous_result_is_state_error() {
        let executor = StubParse { fail: false };
        let mut message = PipelineMessage::ingest("agent", "kb", "a.txt", pipeline_config());
        message
            .append(StageResult::Parse(ParseResult { pages: vec![] }))
            .unwrap();
        message
            .append(StageResult::Chunk(ChunkResult { chunks: vec![] }))
            .unwrap();

        let mut execution = Execution::new(message, &executor);
        assert!(matches!(execution.previous_result(), Err(StageError::State(_))));

        let status = execution.invoke().await;
        assert!(!status.is_completed());
        assert!(status.error.unwrap().starts_with("state error"));
        assert_eq!(execution.message().results.len(), 3);
    }

    #[tokio::test]
    async fn next_requires_completed_invoke() {
        let queue = Arc::new(MemoryQueue::new());
        let router = Router::new(test_routes(), queue.clone());
        let executor = StubParse { fail: false };
        let message = PipelineMessage::ingest("agent", "kb", "a.txt", pipeline_config());
        let mut execution = Execution::new(message, &executor);

        assert!(execution.next(&router).await.is_err());

        execution.invoke().await;
        let destination = execution.next(&router).await.unwrap();
        assert_eq!(destination, Some(QueueId::new("chunk")));
        assert_eq!(queue.drain(&QueueId::new("chunk")).len(), 1);
    }
}
