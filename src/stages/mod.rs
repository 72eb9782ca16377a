//! Concrete stage executors: parse, chunk, embed and store.

pub mod chunk;
pub mod embed;
pub mod parse;
pub mod store;

pub use chunk::ChunkStage;
pub use embed::EmbedStage;
pub use parse::ParseStage;
pub use store::StoreStage;

use crate::chunking::ChunkingError;
use crate::embedding::EmbeddingClientError;
use crate::parsing::ParseError;
use crate::pipeline::StageError;
use crate::pipeline::config::UnsupportedExtension;
use crate::storage::ObjectStoreError;
use crate::store::VectorStoreError;

impl From<UnsupportedExtension> for StageError {
    fn from(error: UnsupportedExtension) -> Self {
        Self::Validation(error.to_string())
    }
}

impl From<ObjectStoreError> for StageError {
    fn from(error: ObjectStoreError) -> Self {
        Self::Extraction(error.to_string())
    }
}

impl From<ParseError> for StageError {
    fn from(error: ParseError) -> Self {
        match error {
            ParseError::Unavailable(_) => Self::Configuration(error.to_string()),
            ParseError::Partition(_) => Self::Provider(error.to_string()),
            ParseError::Malformed { .. } => Self::Extraction(error.to_string()),
        }
    }
}

impl From<EmbeddingClientError> for StageError {
    fn from(error: EmbeddingClientError) -> Self {
        match error {
            EmbeddingClientError::ProviderUnavailable(_) => {
                Self::Configuration(error.to_string())
            }
            other => Self::Provider(other.to_string()),
        }
    }
}

impl From<ChunkingError> for StageError {
    fn from(error: ChunkingError) -> Self {
        match error {
            ChunkingError::InvalidParameters(_) => Self::Validation(error.to_string()),
            ChunkingError::Embedding(inner) => inner.into(),
        }
    }
}

impl From<VectorStoreError> for StageError {
    fn from(error: VectorStoreError) -> Self {
        match error {
            VectorStoreError::Unavailable(_) => Self::Configuration(error.to_string()),
            other => Self::Provider(other.to_string()),
        }
    }
}

/// Effective embedding batch size for a message.
pub(crate) fn batch_size(message_override: Option<usize>, default: usize) -> usize {
    message_override.filter(|size| *size > 0).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_map_to_stage_categories() {
        let unavailable: StageError =
            EmbeddingClientError::ProviderUnavailable("openai".into()).into();
        assert!(matches!(unavailable, StageError::Configuration(_)));

        let unreachable: StageError =
            EmbeddingClientError::Transport("connection refused".into()).into();
        assert!(matches!(unreachable, StageError::Provider(_)));

        let invalid: StageError = ChunkingError::InvalidParameters("overlap".into()).into();
        assert!(matches!(invalid, StageError::Validation(_)));

        let nested: StageError =
            ChunkingError::Embedding(EmbeddingClientError::GenerationFailed("503".into())).into();
        assert!(matches!(nested, StageError::Provider(_)));

        let malformed: StageError = ParseError::malformed("a.csv", "bad row").into();
        assert!(matches!(malformed, StageError::Extraction(_)));
    }

    #[test]
    fn message_batch_size_overrides_default() {
        assert_eq!(batch_size(Some(4), 96), 4);
        assert_eq!(batch_size(Some(0), 96), 96);
        assert_eq!(batch_size(None, 96), 96);
    }
}
