//! The envelope that travels between stage queues.

use super::config::PipelineConfig;
use super::results::{ResultKind, SourceResult, StageResult};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

/// Violations of the append-only, stage-ordered result sequence.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SequenceError {
    /// A serialized message carried no results at all.
    #[error("results must start with a source result, found none")]
    Empty,
    /// The first result was not a source result.
    #[error("results must start with a source result, found {0}")]
    MissingSource(ResultKind),
    /// A result was appended out of stage order.
    #[error("cannot append a {found} result after {last}")]
    OutOfOrder {
        /// Kind of the current last result.
        last: ResultKind,
        /// Kind that was offered.
        found: ResultKind,
    },
}

/// Ordered stage outputs. Never empty, never shrinks, never reordered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<StageResult>", into = "Vec<StageResult>")]
pub struct StageResults(Vec<StageResult>);

impl StageResults {
    /// Start a sequence from the ingestion output.
    pub fn new(source: SourceResult) -> Self {
        Self(vec![StageResult::Source(source)])
    }

    /// Append the output of the next stage.
    pub fn push(&mut self, result: StageResult) -> Result<(), SequenceError> {
        let last = self.last().kind();
        let found = result.kind();
        if last.successor() != Some(found) {
            return Err(SequenceError::OutOfOrder { last, found });
        }
        self.0.push(result);
        Ok(())
    }

    /// Most recent result.
    pub fn last(&self) -> &StageResult {
        // Non-empty by construction and by `TryFrom`.
        &self.0[self.0.len() - 1]
    }

    /// Number of results recorded.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always `false`; present for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The ingestion output at the head of the sequence.
    pub fn source(&self) -> Option<&SourceResult> {
        match self.0.first() {
            Some(StageResult::Source(source)) => Some(source),
            _ => None,
        }
    }

    /// Iterate results in execution order.
    pub fn iter(&self) -> impl Iterator<Item = &StageResult> {
        self.0.iter()
    }
}

impl TryFrom<Vec<StageResult>> for StageResults {
    type Error = SequenceError;

    fn try_from(results: Vec<StageResult>) -> Result<Self, Self::Error> {
        let mut iter = results.into_iter();
        let first = iter.next().ok_or(SequenceError::Empty)?;
        let StageResult::Source(source) = first else {
            return Err(SequenceError::MissingSource(first.kind()));
        };
        let mut sequence = Self::new(source);
        for result in iter {
            sequence.push(result)?;
        }
        Ok(sequence)
    }
}

impl From<StageResults> for Vec<StageResult> {
    fn from(results: StageResults) -> Self {
        results.0
    }
}

/// Envelope accumulating stage results for one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineMessage {
    /// Pipeline run identifier, stable across every hop.
    pub id: String,
    /// Owning agent.
    pub agent_id: String,
    /// Knowledge base the document belongs to.
    pub knowledge_base_id: String,
    /// Strategy selection for each stage.
    pub pipeline_config: PipelineConfig,
    /// Stage outputs in execution order.
    pub results: StageResults,
    /// When the message was created at ingestion.
    #[serde(default)]
    pub created_at: String,
    /// When the last result was appended.
    #[serde(default)]
    pub updated_at: String,
}

impl PipelineMessage {
    /// Create a freshly ingested message holding only its source result.
    pub fn ingest(
        agent_id: impl Into<String>,
        knowledge_base_id: impl Into<String>,
        key: impl Into<String>,
        pipeline_config: PipelineConfig,
    ) -> Self {
        let now = current_timestamp_rfc3339();
        Self {
            id: Uuid::new_v4().to_string(),
            agent_id: agent_id.into(),
            knowledge_base_id: knowledge_base_id.into(),
            pipeline_config,
            results: StageResults::new(SourceResult { key: key.into() }),
            created_at: now.clone(),
            updated_at: now,
        }
    }

    /// Most recent stage output.
    pub fn previous_result(&self) -> &StageResult {
        self.results.last()
    }

    /// Append one stage output and refresh `updated_at`.
    pub fn append(&mut self, result: StageResult) -> Result<(), SequenceError> {
        self.results.push(result)?;
        self.updated_at = current_timestamp_rfc3339();
        Ok(())
    }
}

/// Current UTC time as RFC3339.
pub(crate) fn current_timestamp_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}
