//! Wires configuration into stage executors and batch processors.

use crate::config::Config;
use crate::embedding::{EmbedderRegistry, EmbeddingClientError};
use crate::metrics::PipelineMetrics;
use crate::parsing::{ParseError, ParserRegistry};
use crate::pipeline::{
    BatchProcessor, HttpQueueClient, QueueClient, QueueStatusPublisher, Router, Stage,
    StageExecutor, StatusPublisher,
};
use crate::stages::{ChunkStage, EmbedStage, ParseStage, StoreStage};
use crate::storage::{ObjectStore, ObjectStoreError, object_store_from_config};
use crate::store::{StoreRegistry, VectorStoreError};
use std::sync::Arc;
use thiserror::Error;

/// Failures while assembling the runtime.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Object store backend could not be built.
    #[error(transparent)]
    ObjectStore(#[from] ObjectStoreError),
    /// A parser backend could not be built.
    #[error(transparent)]
    Parse(#[from] ParseError),
    /// An embedding provider could not be built.
    #[error(transparent)]
    Embedding(#[from] EmbeddingClientError),
    /// A vector store backend could not be built.
    #[error(transparent)]
    Store(#[from] VectorStoreError),
    /// The queue HTTP client could not be built.
    #[error("failed to build queue client: {0}")]
    Queue(#[from] reqwest::Error),
}

/// Every long-lived collaborator of the stage handlers.
pub struct Runtime {
    bucket: String,
    default_batch_size: usize,
    objects: Arc<dyn ObjectStore>,
    parsers: Arc<ParserRegistry>,
    embedders: Arc<EmbedderRegistry>,
    stores: Arc<StoreRegistry>,
    router: Arc<Router>,
    publisher: Arc<dyn StatusPublisher>,
    metrics: Arc<PipelineMetrics>,
}

impl Runtime {
    /// Production wiring: HTTP queues and statuses published to the status route.
    pub fn from_config(config: &Config) -> Result<Self, RuntimeError> {
        let queue: Arc<dyn QueueClient> = Arc::new(HttpQueueClient::new()?);
        let publisher = Arc::new(QueueStatusPublisher::new(
            queue.clone(),
            config.routes.status_queue().clone(),
        ));
        Self::with_queue(config, queue, publisher)
    }

    /// Wiring over an explicit queue transport and status channel.
    pub fn with_queue(
        config: &Config,
        queue: Arc<dyn QueueClient>,
        publisher: Arc<dyn StatusPublisher>,
    ) -> Result<Self, RuntimeError> {
        let runtime = Self {
            bucket: config.bucket.clone(),
            default_batch_size: config.embedding_batch_size,
            objects: object_store_from_config(config)?,
            parsers: Arc::new(ParserRegistry::from_config(config)?),
            embedders: Arc::new(EmbedderRegistry::from_config(config)?),
            stores: Arc::new(StoreRegistry::from_config(config)?),
            router: Arc::new(Router::new(config.routes.clone(), queue)),
            publisher,
            metrics: Arc::new(PipelineMetrics::new()),
        };
        tracing::info!(
            bucket = %runtime.bucket,
            batch_size = runtime.default_batch_size,
            "Runtime assembled"
        );
        Ok(runtime)
    }

    /// Replace the vector store backends.
    pub fn with_stores(mut self, stores: StoreRegistry) -> Self {
        self.stores = Arc::new(stores);
        self
    }

    /// Replace the embedding providers.
    pub fn with_embedders(mut self, embedders: EmbedderRegistry) -> Self {
        self.embedders = Arc::new(embedders);
        self
    }

    /// Router shared by every stage.
    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    /// Counters shared by every stage.
    pub fn metrics(&self) -> &Arc<PipelineMetrics> {
        &self.metrics
    }

    /// Executor for `stage`.
    pub fn executor(&self, stage: Stage) -> Arc<dyn StageExecutor> {
        match stage {
            Stage::Extraction => Arc::new(ParseStage::new(
                self.objects.clone(),
                self.bucket.clone(),
                self.parsers.clone(),
            )),
            Stage::Chunking => Arc::new(ChunkStage::new(
                self.embedders.clone(),
                self.default_batch_size,
            )),
            Stage::Embedding => Arc::new(EmbedStage::new(
                self.embedders.clone(),
                self.default_batch_size,
            )),
            Stage::Storing => Arc::new(StoreStage::new(
                self.stores.clone(),
                self.metrics.clone(),
            )),
        }
    }

    /// Batch processor running `stage`.
    pub fn processor(&self, stage: Stage) -> BatchProcessor {
        BatchProcessor::new(
            self.executor(stage),
            self.router.clone(),
            self.publisher.clone(),
            self.metrics.clone(),
        )
    }
}
