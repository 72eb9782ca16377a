//! Per-attempt status events and the channel they are published on.

use super::message::current_timestamp_rfc3339;
use super::router::{QueueClient, QueueId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Pipeline stage a status refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    /// Parse.
    Extraction,
    /// Chunk.
    Chunking,
    /// Embed.
    Embedding,
    /// Store.
    Storing,
}

impl Stage {
    /// Every stage in execution order.
    pub const ALL: [Self; 4] = [
        Self::Extraction,
        Self::Chunking,
        Self::Embedding,
        Self::Storing,
    ];

    /// Wire name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Extraction => "extraction",
            Self::Chunking => "chunking",
            Self::Embedding => "embedding",
            Self::Storing => "storing",
        }
    }

    /// Accept either the status name (`extraction`) or the handler name (`parse`).
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "extraction" | "parse" => Some(Self::Extraction),
            "chunking" | "chunk" => Some(Self::Chunking),
            "embedding" | "embed" => Some(Self::Embedding),
            "storing" | "store" => Some(Self::Storing),
            _ => None,
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one stage attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionState {
    /// The stage appended its result.
    Completed,
    /// The stage failed; the message was not advanced.
    Failed,
}

/// Status event emitted for every stage attempt. Not persisted in the message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageStatus {
    /// Event identifier.
    pub id: String,
    /// Owning agent.
    pub agent_id: String,
    /// Pipeline message id.
    pub pipeline_id: String,
    /// Knowledge base id.
    pub knowledge_base_id: String,
    /// Stage that ran.
    pub stage: Stage,
    /// Outcome.
    pub execution_state: ExecutionState,
    /// Human-readable failure reason.
    pub error: Option<String>,
    /// Serialized stage result on success.
    pub results: Option<String>,
    /// Event creation time (RFC3339).
    pub timestamp: String,
}

/// Identity fields copied into every status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct StatusIdentity {
    /// Pipeline message id.
    #[serde(default, rename = "id")]
    pub pipeline_id: String,
    /// Owning agent.
    #[serde(default)]
    pub agent_id: String,
    /// Knowledge base id.
    #[serde(default)]
    pub knowledge_base_id: String,
}

impl StatusIdentity {
    /// Recover whatever identity a possibly malformed body still carries.
    pub fn recover(body: &str) -> Self {
        serde_json::from_str(body).unwrap_or_default()
    }
}

impl StageStatus {
    /// Successful attempt carrying the serialized new result.
    pub fn completed(identity: StatusIdentity, stage: Stage, results: String) -> Self {
        Self::build(identity, stage, ExecutionState::Completed, None, Some(results))
    }

    /// Failed attempt with its reason.
    pub fn failed(identity: StatusIdentity, stage: Stage, error: impl Into<String>) -> Self {
        Self::build(
            identity,
            stage,
            ExecutionState::Failed,
            Some(error.into()),
            None,
        )
    }

    fn build(
        identity: StatusIdentity,
        stage: Stage,
        execution_state: ExecutionState,
        error: Option<String>,
        results: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            agent_id: identity.agent_id,
            pipeline_id: identity.pipeline_id,
            knowledge_base_id: identity.knowledge_base_id,
            stage,
            execution_state,
            error,
            results,
            timestamp: current_timestamp_rfc3339(),
        }
    }

    /// Whether the attempt completed.
    pub fn is_completed(&self) -> bool {
        self.execution_state == ExecutionState::Completed
    }
}

/// Observability channel for stage attempts. Fire-and-forget.
#[async_trait]
pub trait StatusPublisher: Send + Sync {
    /// Publish one status; failures are logged, never returned.
    async fn publish(&self, status: StageStatus);
}

/// Publishes statuses onto the status queue.
pub struct QueueStatusPublisher {
    queue: Arc<dyn QueueClient>,
    destination: QueueId,
}

impl QueueStatusPublisher {
    /// Publish to `destination` through `queue`.
    pub fn new(queue: Arc<dyn QueueClient>, destination: QueueId) -> Self {
        Self { queue, destination }
    }
}

#[async_trait]
impl StatusPublisher for QueueStatusPublisher {
    async fn publish(&self, status: StageStatus) {
        let body = match serde_json::to_string(&status) {
            Ok(body) => body,
            Err(error) => {
                tracing::error!(
                    error = %error,
                    pipeline_id = %status.pipeline_id,
                    "Failed to serialize status"
                );
                return;
            }
        };
        if let Err(error) = self.queue.send(&self.destination, body).await {
            tracing::warn!(
                error = %error,
                pipeline_id = %status.pipeline_id,
                stage = %status.stage,
                queue = %self.destination,
                "Failed to publish status"
            );
        }
    }
}

/// Keeps published statuses in memory; used by the local runner and tests.
#[derive(Debug, Default)]
pub struct MemoryStatusPublisher {
    statuses: Mutex<Vec<StageStatus>>,
}

impl MemoryStatusPublisher {
    /// Create an empty publisher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every status published so far.
    pub fn statuses(&self) -> Vec<StageStatus> {
        self.statuses
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl StatusPublisher for MemoryStatusPublisher {
    async fn publish(&self, status: StageStatus) {
        if let Ok(mut guard) = self.statuses.lock() {
            guard.push(status);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::router::MemoryQueue;
    use serde_json::Value;

    #[test]
    fn identity_recovery_is_lenient() {
        let identity = StatusIdentity::recover(r#"{"id":"p-1","agent_id":"a-1","results":[]}"#);
        assert_eq!(identity.pipeline_id, "p-1");
        assert_eq!(identity.agent_id, "a-1");
        assert_eq!(identity.knowledge_base_id, "");

        assert_eq!(StatusIdentity::recover("{not json"), StatusIdentity::default());
    }

    #[test]
    fn status_serializes_lowercase_enums() {
        let status = StageStatus::failed(StatusIdentity::default(), Stage::Chunking, "boom");
        let value = serde_json::to_value(&status).unwrap();
        assert_eq!(value["stage"], "chunking");
        assert_eq!(value["execution_state"], "failed");
        assert_eq!(value["error"], "boom");
        assert_eq!(value["results"], Value::Null);
    }

    #[test]
    fn stage_names_accept_handler_aliases() {
        assert_eq!(Stage::from_name("parse"), Some(Stage::Extraction));
        assert_eq!(Stage::from_name("Storing"), Some(Stage::Storing));
        assert_eq!(Stage::from_name("source"), None);
    }

    #[tokio::test]
    async fn queue_publisher_sends_serialized_status() {
        let queue = Arc::new(MemoryQueue::new());
        let destination = QueueId::new("status");
        let publisher = QueueStatusPublisher::new(queue.clone(), destination.clone());
        publisher
            .publish(StageStatus::completed(
                StatusIdentity {
                    pipeline_id: "p-1".into(),
                    agent_id: "a-1".into(),
                    knowledge_base_id: "kb-1".into(),
                },
                Stage::Embedding,
                "{}".into(),
            ))
            .await;

        let sent = queue.drain(&destination);
        assert_eq!(sent.len(), 1);
        let decoded: StageStatus = serde_json::from_str(&sent[0]).unwrap();
        assert_eq!(decoded.pipeline_id, "p-1");
        assert!(decoded.is_completed());
    }
}
