//! Message model, stage contract, batch handling, routing and status reporting.

pub mod batch;
pub mod config;
pub mod executor;
pub mod message;
pub mod results;
pub mod router;
pub mod status;

pub use batch::{BatchEvent, BatchItemFailure, BatchProcessor, BatchResponse, QueueRecord};
pub use config::{
    ChunkConfig, ChunkStrategyKind, DataframeChunkConfig, Discriminator, EmbedConfig,
    EmbeddingProviderKind, FixedChunkConfig, ParseConfig, ParserKind, PipelineConfig,
    SemanticChunkConfig, StoreConfig, StoreTargetKind, UnsupportedExtension,
};
pub use executor::{Execution, StageError, StageExecutor};
pub use message::{PipelineMessage, SequenceError, StageResults};
pub use results::{
    ChunkResult, EmbedResult, EmbeddedChunk, Page, PageMetadata, ParseResult, ResultKind,
    SourceResult, StageResult, StoreResult, StoreStatus,
};
pub use router::{
    HttpQueueClient, MemoryQueue, QueueClient, QueueId, RouteError, RouteStage, Router,
    RoutingTable,
};
pub use status::{
    ExecutionState, MemoryStatusPublisher, QueueStatusPublisher, Stage, StageStatus,
    StatusIdentity, StatusPublisher,
};
