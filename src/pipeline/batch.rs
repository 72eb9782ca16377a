//! Batch entry point: isolates every record and reports partial failures to the broker.

use super::executor::{Execution, StageExecutor};
use super::message::PipelineMessage;
use super::router::Router;
use super::status::{StageStatus, StatusIdentity, StatusPublisher};
use crate::metrics::PipelineMetrics;
use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

/// One delivered queue record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueRecord {
    /// Broker-assigned delivery id, echoed back on failure.
    #[serde(rename = "messageId")]
    pub message_id: String,
    /// Serialized [`PipelineMessage`].
    pub body: String,
}

/// Broker batch event. Attributes other than id and body are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchEvent {
    /// Delivered records.
    #[serde(rename = "Records", default)]
    pub records: Vec<QueueRecord>,
}

/// A record the broker should redeliver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchItemFailure {
    /// The failed record's `messageId`.
    #[serde(rename = "itemIdentifier")]
    pub item_identifier: String,
}

/// Partial batch response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchResponse {
    /// Failed records, in delivery order.
    #[serde(rename = "batchItemFailures")]
    pub batch_item_failures: Vec<BatchItemFailure>,
}

impl BatchResponse {
    /// Ids of the failed records.
    pub fn failed_ids(&self) -> Vec<&str> {
        self.batch_item_failures
            .iter()
            .map(|failure| failure.item_identifier.as_str())
            .collect()
    }
}

/// Runs one stage over a batch of records.
pub struct BatchProcessor {
    executor: Arc<dyn StageExecutor>,
    router: Arc<Router>,
    publisher: Arc<dyn StatusPublisher>,
    metrics: Arc<PipelineMetrics>,
}

impl BatchProcessor {
    /// Build a processor for a single stage.
    pub fn new(
        executor: Arc<dyn StageExecutor>,
        router: Arc<Router>,
        publisher: Arc<dyn StatusPublisher>,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            executor,
            router,
            publisher,
            metrics,
        }
    }

    /// Process every record independently, sequentially, and collect the failures.
    pub async fn process(&self, records: Vec<QueueRecord>) -> BatchResponse {
        let mut response = BatchResponse::default();
        let total = records.len();

        for record in records {
            let outcome = AssertUnwindSafe(self.process_record(&record))
                .catch_unwind()
                .await;
            let succeeded = match outcome {
                Ok(succeeded) => succeeded,
                Err(_) => {
                    tracing::error!(
                        message_id = %record.message_id,
                        stage = %self.executor.stage(),
                        "Record processing panicked"
                    );
                    self.publish_failure(&record.body, "panic while processing record")
                        .await;
                    false
                }
            };

            if succeeded {
                self.metrics.record_processed();
            } else {
                self.metrics.record_failed();
                response.batch_item_failures.push(BatchItemFailure {
                    item_identifier: record.message_id,
                });
            }
        }

        tracing::info!(
            stage = %self.executor.stage(),
            records = total,
            failed = response.batch_item_failures.len(),
            "Batch processed"
        );
        response
    }

    /// Convenience wrapper over [`BatchProcessor::process`] for a decoded broker event.
    pub async fn handle_event(&self, event: BatchEvent) -> BatchResponse {
        self.process(event.records).await
    }

    async fn process_record(&self, record: &QueueRecord) -> bool {
        let message: PipelineMessage = match serde_json::from_str(&record.body) {
            Ok(message) => message,
            Err(error) => {
                tracing::warn!(
                    message_id = %record.message_id,
                    stage = %self.executor.stage(),
                    error = %error,
                    "Malformed record body"
                );
                self.publish_failure(
                    &record.body,
                    format!("validation error: malformed message: {error}"),
                )
                .await;
                return false;
            }
        };

        let mut execution = Execution::new(message, self.executor.as_ref());
        let status = execution.invoke().await;
        let completed = status.is_completed();
        self.publisher.publish(status).await;
        if !completed {
            return false;
        }

        match execution.next(&self.router).await {
            Ok(_) => true,
            Err(error) => {
                tracing::warn!(
                    message_id = %record.message_id,
                    pipeline_id = %execution.message().id,
                    error = %error,
                    "Failed to forward message"
                );
                self.publish_failure(&record.body, format!("forwarding error: {error}"))
                    .await;
                false
            }
        }
    }

    async fn publish_failure(&self, body: &str, error: impl Into<String>) {
        let status =
            StageStatus::failed(StatusIdentity::recover(body), self.executor.stage(), error);
        self.publisher.publish(status).await;
    }
}
