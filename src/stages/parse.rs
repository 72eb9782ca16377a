//! Fetch the uploaded file and extract pages.

use crate::parsing::{DocumentSource, ParserRegistry};
use crate::pipeline::config::Discriminator;
use crate::pipeline::results::{ParseResult, ResultKind, StageResult};
use crate::pipeline::status::Stage;
use crate::pipeline::{PipelineMessage, StageError, StageExecutor};
use crate::storage::ObjectStore;
use async_trait::async_trait;
use std::sync::Arc;

/// Parse stage: `SourceResult` in, `ParseResult` out.
pub struct ParseStage {
    objects: Arc<dyn ObjectStore>,
    bucket: String,
    parsers: Arc<ParserRegistry>,
}

impl ParseStage {
    /// Read uploads from `bucket` on `objects`.
    pub fn new(
        objects: Arc<dyn ObjectStore>,
        bucket: impl Into<String>,
        parsers: Arc<ParserRegistry>,
    ) -> Self {
        Self {
            objects,
            bucket: bucket.into(),
            parsers,
        }
    }
}

#[async_trait]
impl StageExecutor for ParseStage {
    fn stage(&self) -> Stage {
        Stage::Extraction
    }

    fn expects(&self) -> ResultKind {
        ResultKind::Source
    }

    async fn execute(&self, message: &PipelineMessage) -> Result<StageResult, StageError> {
        let key = message
            .results
            .source()
            .map(|source| source.key.as_str())
            .ok_or_else(|| StageError::State("message carries no source key".into()))?;
        let parse = &message.pipeline_config.parse;
        let kind = parse.resolve_parser(key)?;

        let object = self.objects.get_object(&self.bucket, key).await?;
        let last_update_date = object.last_update_date();
        let source = DocumentSource {
            key,
            bytes: &object.bytes,
            last_update_date: &last_update_date,
        };

        let pages = self.parsers.parse(kind, &source, parse.chunk_size).await?;
        tracing::info!(
            pipeline_id = %message.id,
            key,
            parser = kind.as_str(),
            pages = pages.len(),
            "Parsed source"
        );
        Ok(StageResult::Parse(ParseResult { pages }))
    }
}
