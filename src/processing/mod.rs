//! Document processing: chunking, pipeline orchestration, and retrieval.

pub mod chunking;
pub mod service;
pub mod types;

pub use chunking::{ChunkMetadata, ChunkOptions, TextChunk, chunk_markdown, chunk_text};
pub use service::{PipelineApi, PipelineService};
pub use types::{
    IngestReceipt, PipelineError, ProcessingOutcome, RunOutcome, SearchError, SearchRequest,
};
