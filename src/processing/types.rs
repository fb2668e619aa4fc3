//! Shared types used by the processing pipeline and retrieval path.

use serde::Deserialize;
use thiserror::Error;
use uuid::Uuid;

use crate::documents::DocumentStoreError;
use crate::embedding::EmbeddingError;
use crate::extraction::{ExtractionError, ExtractionMethod};
use crate::jobs::{JobStatus, JobStoreError, JobTransitionError};
use crate::storage::StorageError;
use crate::vectorstore::VectorStoreError;

/// Errors raised while running the document pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Document lookup or status update failed.
    #[error(transparent)]
    Document(#[from] DocumentStoreError),
    /// Job lookup or transition failed.
    #[error(transparent)]
    Job(JobStoreError),
    /// The job was cancelled out from under the run.
    #[error("Processing job was cancelled")]
    Cancelled,
    /// Raw bytes could not be read from the blob store.
    #[error(transparent)]
    Storage(#[from] StorageError),
    /// Text extraction failed.
    #[error(transparent)]
    Extraction(#[from] ExtractionError),
    /// Extraction succeeded but produced no usable text.
    #[error("No text could be extracted from document")]
    EmptyExtraction,
    /// Embedding generation failed.
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),
    /// Chunk persistence failed.
    #[error(transparent)]
    VectorStore(#[from] VectorStoreError),
}

/// A transition rejected because the job was cancelled is a cooperative stop
/// signal, not a failure: the run abandons its remaining stages and the
/// document is left alone.
impl From<JobStoreError> for PipelineError {
    fn from(error: JobStoreError) -> Self {
        if let JobStoreError::Transition(JobTransitionError::InvalidTransition {
            status: JobStatus::Cancelled,
            ..
        }) = error
        {
            return Self::Cancelled;
        }
        Self::Job(error)
    }
}

/// Result of one pipeline run.
#[derive(Debug, Clone)]
pub enum RunOutcome {
    /// Pipeline ran to completion.
    Processed(ProcessingOutcome),
    /// Job was cancelled, either while queued or while the run was in
    /// flight; the document was left as it was.
    SkippedCancelled,
}

/// Statistics describing a completed pipeline run.
#[derive(Debug, Clone)]
pub struct ProcessingOutcome {
    /// Document that was processed.
    pub document_id: Uuid,
    /// Number of chunks produced by the chunker.
    pub chunk_count: usize,
    /// Number of chunks persisted to the vector store.
    pub persisted_chunks: usize,
    /// Chunks dropped because no embedding was produced for them.
    pub failed_chunks: usize,
    /// How the document's text was obtained.
    pub extraction_method: ExtractionMethod,
    /// Character count of the extracted text.
    pub char_count: usize,
}

/// A semantic search request.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest {
    /// Natural-language query text.
    pub query: String,
    /// Maximum number of hits to return.
    #[serde(default)]
    pub limit: Option<usize>,
    /// Restrict hits to one document.
    #[serde(default)]
    pub document_id: Option<Uuid>,
    /// Minimum similarity score, 0.0 to 1.0.
    #[serde(default)]
    pub score_threshold: Option<f32>,
}

/// Result of accepting an upload.
///
/// `job_id` is `None` when the upload was stored but the processing job could
/// not be scheduled; the document can be reprocessed later.
#[derive(Debug, Clone)]
pub struct IngestReceipt {
    /// The registered document.
    pub document: crate::documents::Document,
    /// Job scheduled to process it, when scheduling succeeded.
    pub job_id: Option<Uuid>,
}

/// Errors raised while searching for similar chunks.
#[derive(Debug, Error)]
pub enum SearchError {
    /// Query embedding failed.
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),
    /// Vector store query failed.
    #[error(transparent)]
    VectorStore(#[from] VectorStoreError),
    /// Query embedding does not match the collection's dimension.
    #[error("Query embedding has dimension {actual}, expected {expected}")]
    DimensionMismatch {
        /// Dimension configured for the collection.
        expected: usize,
        /// Dimension the embedder produced.
        actual: usize,
    },
}
