//! Shared types used by the vector store client and helpers.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

/// Errors returned while interacting with the vector store.
#[derive(Debug, Error)]
pub enum VectorStoreError {
    /// Base URL failed to parse or normalize.
    #[error("Invalid vector store URL: {0}")]
    InvalidUrl(String),
    /// HTTP layer failed before receiving a response.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// Store responded with an unexpected status code.
    #[error("Unexpected vector store response ({status}): {body}")]
    UnexpectedStatus {
        /// HTTP status returned from the store.
        status: StatusCode,
        /// Body payload associated with the failing response.
        body: String,
    },
}

/// A chunk ready to be persisted with its embedding.
#[derive(Debug, Clone)]
pub struct ChunkRecord {
    /// Document the chunk belongs to.
    pub document_id: Uuid,
    /// Chunk text.
    pub content: String,
    /// Embedding vector produced for the chunk.
    pub embedding: Vec<f32>,
    /// Chunk metadata stored alongside the vector.
    pub metadata: Value,
}

/// A persisted chunk returned by a similarity query.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    /// Identifier assigned to the stored vector.
    pub id: String,
    /// Owning document, when the payload carries one.
    pub document_id: Option<Uuid>,
    /// Chunk text.
    pub content: String,
    /// Cosine similarity against the query vector.
    pub score: f32,
    /// Chunk metadata stored at indexing time.
    pub metadata: Option<Value>,
}

/// Persistence and retrieval interface for embedded chunks.
#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// Persists chunks, returning the number of vectors written.
    async fn insert_chunks(&self, chunks: Vec<ChunkRecord>) -> Result<usize, VectorStoreError>;

    /// Removes every chunk belonging to a document.
    async fn delete_by_document(&self, document_id: Uuid) -> Result<(), VectorStoreError>;

    /// Finds the chunks nearest to a query vector.
    ///
    /// Results are ordered by descending similarity and exclude anything
    /// scoring below `score_threshold`. When `document_id` is given, only
    /// that document's chunks are considered.
    async fn find_similar(
        &self,
        vector: Vec<f32>,
        limit: usize,
        document_id: Option<Uuid>,
        score_threshold: f32,
    ) -> Result<Vec<ScoredChunk>, VectorStoreError>;
}

#[derive(Deserialize)]
pub(crate) struct QueryResponse {
    pub(crate) result: QueryResponseResult,
}

// Qdrant versions differ on whether the query result is a bare array or an
// object wrapping a `points` array.
#[derive(Deserialize)]
#[serde(untagged)]
pub(crate) enum QueryResponseResult {
    Points(Vec<QueryPoint>),
    Object {
        #[serde(default)]
        points: Vec<QueryPoint>,
    },
}

#[derive(Deserialize)]
pub(crate) struct QueryPoint {
    pub(crate) id: Value,
    pub(crate) score: f32,
    #[serde(default)]
    pub(crate) payload: Option<Map<String, Value>>,
}
