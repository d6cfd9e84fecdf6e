use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum IngestError {
    #[error("document has no pages")]
    EmptyDocument,

    #[error("extraction failed: {0}")]
    Extraction(String),

    #[error("document too large: {0}")]
    DocumentTooLarge(String),

    #[error("labeling failed: {0}")]
    Labeling(String),

    #[error("ingestion already in progress for source {0}")]
    IngestionInProgress(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl From<StoreError> for IngestError {
    fn from(value: StoreError) -> Self {
        IngestError::Store(value.to_string())
    }
}

impl From<LabelingError> for IngestError {
    fn from(value: LabelingError) -> Self {
        IngestError::Labeling(value.to_string())
    }
}

#[derive(Debug, Clone, Error)]
pub enum LabelingError {
    #[error("labeler request failed: {0}")]
    Request(String),

    #[error("labeler returned an invalid response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Clone, Error)]
pub enum EmbeddingError {
    #[error("text cannot be empty for embedding")]
    EmptyInput,

    #[error("embedding request failed: {0}")]
    Request(String),

    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("embedding dimension {actual} does not match expected {expected}")]
    Dimension { expected: usize, actual: usize },
}

#[derive(Debug, Clone, Error)]
pub enum GenerationError {
    #[error("generation request failed: {0}")]
    Request(String),

    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("model returned an empty response")]
    EmptyResponse,

    #[error("generation timed out after {0:?}")]
    Timeout(Duration),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("corrupt row: {0}")]
    Corrupt(String),
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("search failed: {0}")]
    Search(SearchError),

    #[error("search timed out after {0:?}")]
    SearchTimeout(Duration),

    #[error(transparent)]
    Generation(#[from] GenerationError),
}

impl From<SearchError> for ChatError {
    fn from(value: SearchError) -> Self {
        match value {
            SearchError::InvalidQuery(message) => ChatError::InvalidQuery(message),
            other => ChatError::Search(other),
        }
    }
}

pub type Result<T, E = IngestError> = std::result::Result<T, E>;
