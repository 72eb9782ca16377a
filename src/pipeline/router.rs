//! Next-stage routing and the queue transport seam.
//!
//! Routes are read from `DOCSTAGE_ROUTE_<STAGE>` (stage default) and
//! `DOCSTAGE_ROUTE_<STAGE>__<DISCRIMINATOR>` (override). The table is expanded eagerly so that
//! every discriminator of every stage resolves before the first record is handled; a missing
//! or unknown entry is a configuration error.

use super::config::{
    ChunkStrategyKind, Discriminator, EmbeddingProviderKind, ParserKind, PipelineConfig,
    StoreTargetKind, UnsupportedExtension,
};
use super::message::PipelineMessage;
use super::results::StageResult;
use crate::config::ConfigError;
use async_trait::async_trait;
use reqwest::Client;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex};
use thiserror::Error;

const ROUTE_PREFIX: &str = "DOCSTAGE_ROUTE_";

/// Opaque queue identifier (a URL for HTTP transports, a name for the in-memory queue).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueueId(String);

impl QueueId {
    /// Wrap a queue identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QueueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Errors raised while forwarding a message.
#[derive(Debug, Error)]
pub enum RouteError {
    /// No destination for the discriminator. Unreachable once the table is validated.
    #[error("no route for {stage} discriminator '{discriminator}'")]
    Unresolved {
        /// Stage being routed to.
        stage: RouteStage,
        /// Discriminator that failed to resolve.
        discriminator: String,
    },
    /// Forwarding was attempted before the stage completed.
    #[error("pipeline {0} has no completed stage to forward")]
    NotCompleted(String),
    /// The source key has no parser.
    #[error(transparent)]
    Unsupported(#[from] UnsupportedExtension),
    /// Message could not be serialized.
    #[error("failed to serialize message: {0}")]
    Serialize(#[from] serde_json::Error),
    /// Queue transport failed.
    #[error("queue send to {queue} failed: {reason}")]
    Transport {
        /// Destination queue.
        queue: QueueId,
        /// Transport error.
        reason: String,
    },
}

/// Queue families a message can be routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteStage {
    /// Parse handlers, keyed by parser kind.
    Parse,
    /// Chunk handlers, keyed by strategy.
    Chunk,
    /// Embed handlers, keyed by provider.
    Embed,
    /// Store handlers, keyed by target.
    Store,
    /// Status channel, single destination.
    Status,
}

impl RouteStage {
    /// Every route family.
    pub const ALL: [Self; 5] = [
        Self::Parse,
        Self::Chunk,
        Self::Embed,
        Self::Store,
        Self::Status,
    ];

    fn env_name(self) -> &'static str {
        match self {
            Self::Parse => "PARSE",
            Self::Chunk => "CHUNK",
            Self::Embed => "EMBED",
            Self::Store => "STORE",
            Self::Status => "STATUS",
        }
    }

    /// Discriminators that must each resolve to a queue; `Status` has the single empty one.
    pub fn discriminators(self) -> Vec<&'static str> {
        fn names<D: Discriminator>() -> Vec<&'static str> {
            D::ALL.iter().map(Discriminator::as_str).collect()
        }
        match self {
            Self::Parse => names::<ParserKind>(),
            Self::Chunk => names::<ChunkStrategyKind>(),
            Self::Embed => names::<EmbeddingProviderKind>(),
            Self::Store => names::<StoreTargetKind>(),
            Self::Status => vec![""],
        }
    }
}

impl fmt::Display for RouteStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.env_name().to_ascii_lowercase())
    }
}

/// Fully expanded `(stage, discriminator) -> queue` table.
#[derive(Debug, Clone)]
pub struct RoutingTable {
    routes: HashMap<(RouteStage, &'static str), QueueId>,
    status: QueueId,
}

impl RoutingTable {
    /// Build and validate the table from `(name, value)` pairs, typically `std::env::vars()`.
    pub fn from_vars<I, K, V>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut defaults: HashMap<RouteStage, QueueId> = HashMap::new();
        let mut overrides: HashMap<(RouteStage, &'static str), QueueId> = HashMap::new();

        for (key, value) in vars {
            let Some(rest) = key.as_ref().strip_prefix(ROUTE_PREFIX) else {
                continue;
            };
            let value = value.as_ref().trim();
            if value.is_empty() {
                continue;
            }
            let (stage_name, discriminator) = match rest.split_once("__") {
                Some((stage, discriminator)) => (stage, Some(discriminator)),
                None => (rest, None),
            };
            let stage = RouteStage::ALL
                .into_iter()
                .find(|stage| stage.env_name().eq_ignore_ascii_case(stage_name))
                .ok_or_else(|| ConfigError::UnknownRoute(key.as_ref().to_string()))?;

            match discriminator {
                None => {
                    defaults.insert(stage, QueueId::new(value));
                }
                Some(name) => {
                    let known = stage
                        .discriminators()
                        .into_iter()
                        .find(|candidate| {
                            !candidate.is_empty() && candidate.eq_ignore_ascii_case(name)
                        })
                        .ok_or_else(|| ConfigError::UnknownDiscriminator {
                            stage: stage.to_string(),
                            discriminator: name.to_string(),
                        })?;
                    overrides.insert((stage, known), QueueId::new(value));
                }
            }
        }

        let mut routes = HashMap::new();
        for stage in RouteStage::ALL {
            for discriminator in stage.discriminators() {
                let queue = overrides
                    .remove(&(stage, discriminator))
                    .or_else(|| defaults.get(&stage).cloned())
                    .ok_or_else(|| ConfigError::MissingRoute {
                        stage: stage.to_string(),
                        discriminator: discriminator.to_string(),
                    })?;
                routes.insert((stage, discriminator), queue);
            }
        }

        let status = routes
            .get(&(RouteStage::Status, ""))
            .cloned()
            .ok_or_else(|| ConfigError::MissingRoute {
                stage: RouteStage::Status.to_string(),
                discriminator: String::new(),
            })?;

        Ok(Self { routes, status })
    }

    /// Look up the destination for a stage and discriminator.
    pub fn resolve_destination(
        &self,
        stage: RouteStage,
        discriminator: &str,
    ) -> Result<&QueueId, RouteError> {
        self.routes
            .iter()
            .find(|((candidate, name), _)| {
                *candidate == stage && name.eq_ignore_ascii_case(discriminator)
            })
            .map(|(_, queue)| queue)
            .ok_or_else(|| RouteError::Unresolved {
                stage,
                discriminator: discriminator.to_string(),
            })
    }

    /// Destination of status events.
    pub fn status_queue(&self) -> &QueueId {
        &self.status
    }
}

/// Transport used to hand a serialized message to a queue.
#[async_trait]
pub trait QueueClient: Send + Sync {
    /// Enqueue one message body.
    async fn send(&self, queue: &QueueId, body: String) -> Result<(), RouteError>;
}

/// Posts message bodies to queue URLs.
pub struct HttpQueueClient {
    client: Client,
}

impl HttpQueueClient {
    /// Build the HTTP transport.
    pub fn new() -> Result<Self, reqwest::Error> {
        let client = Client::builder().user_agent("docstage/0.1").build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl QueueClient for HttpQueueClient {
    async fn send(&self, queue: &QueueId, body: String) -> Result<(), RouteError> {
        let transport = |reason: String| RouteError::Transport {
            queue: queue.clone(),
            reason,
        };
        let response = self
            .client
            .post(queue.as_str())
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|error| transport(error.to_string()))?;

        if response.status().is_success() {
            tracing::debug!(queue = %queue, "Message enqueued");
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(transport(format!("{status}: {body}")))
        }
    }
}

/// Process-local queues keyed by identifier.
#[derive(Debug, Default)]
pub struct MemoryQueue {
    queues: Mutex<HashMap<QueueId, VecDeque<String>>>,
}

impl MemoryQueue {
    /// Create empty queues.
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove and return every body queued on `queue`.
    pub fn drain(&self, queue: &QueueId) -> Vec<String> {
        self.queues
            .lock()
            .ok()
            .and_then(|mut guard| guard.remove(queue))
            .map(Vec::from)
            .unwrap_or_default()
    }

    /// Number of bodies waiting on `queue`.
    pub fn len(&self, queue: &QueueId) -> usize {
        self.queues
            .lock()
            .ok()
            .and_then(|guard| guard.get(queue).map(VecDeque::len))
            .unwrap_or(0)
    }
}

#[async_trait]
impl QueueClient for MemoryQueue {
    async fn send(&self, queue: &QueueId, body: String) -> Result<(), RouteError> {
        let mut guard = self.queues.lock().map_err(|_| RouteError::Transport {
            queue: queue.clone(),
            reason: "queue lock poisoned".into(),
        })?;
        guard.entry(queue.clone()).or_default().push_back(body);
        Ok(())
    }
}

/// Resolves and performs the hop to the next stage queue.
pub struct Router {
    table: RoutingTable,
    queue: Arc<dyn QueueClient>,
}

impl Router {
    /// Route through `table` using `queue` as transport.
    pub fn new(table: RoutingTable, queue: Arc<dyn QueueClient>) -> Self {
        Self { table, queue }
    }

    /// Look up a destination.
    pub fn resolve_destination(
        &self,
        stage: RouteStage,
        discriminator: &str,
    ) -> Result<&QueueId, RouteError> {
        self.table.resolve_destination(stage, discriminator)
    }

    /// Destination after the message's last result, `None` once stored.
    pub fn next_hop(&self, message: &PipelineMessage) -> Result<Option<&QueueId>, RouteError> {
        let config: &PipelineConfig = &message.pipeline_config;
        let (stage, discriminator) = match message.previous_result() {
            StageResult::Source(source) => (
                RouteStage::Parse,
                config.parse.resolve_parser(&source.key)?.as_str(),
            ),
            StageResult::Parse(_) => (RouteStage::Chunk, config.chunk.kind().as_str()),
            StageResult::Chunk(_) => (RouteStage::Embed, config.embed.provider.as_str()),
            StageResult::Embed(_) => (RouteStage::Store, config.store.target.as_str()),
            StageResult::Store(_) => return Ok(None),
        };
        self.resolve_destination(stage, discriminator).map(Some)
    }

    /// Serialize the message and enqueue it on its next hop.
    pub async fn forward(&self, message: &PipelineMessage) -> Result<Option<QueueId>, RouteError> {
        let Some(destination) = self.next_hop(message)? else {
            tracing::debug!(pipeline_id = %message.id, "Message reached terminal stage");
            return Ok(None);
        };
        let body = serde_json::to_string(message)?;
        self.queue.send(destination, body).await?;
        tracing::debug!(pipeline_id = %message.id, queue = %destination, "Message forwarded");
        Ok(Some(destination.clone()))
    }

    /// Create a message for an uploaded file and enqueue it for parsing.
    pub async fn ingest(
        &self,
        agent_id: &str,
        knowledge_base_id: &str,
        key: &str,
        pipeline_config: PipelineConfig,
    ) -> Result<PipelineMessage, RouteError> {
        let message = PipelineMessage::ingest(agent_id, knowledge_base_id, key, pipeline_config);
        self.forward(&message).await?;
        tracing::info!(
            pipeline_id = %message.id,
            agent_id,
            knowledge_base_id,
            key,
            "Document ingested"
        );
        Ok(message)
    }
}
