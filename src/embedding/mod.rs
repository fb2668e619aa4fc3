//! Embedding generation and similarity math.
//!
//! The [`Embedder`] trait abstracts the remote provider so the pipeline and
//! tests can substitute implementations. Batching lives in a default trait
//! method: texts are processed in sequential batches whose members are
//! embedded concurrently, and an individual failure never aborts the batch;
//! the failed text is simply absent from the result.

use async_trait::async_trait;
use futures_util::future::join_all;
use reqwest::StatusCode;
use std::time::Duration;
use thiserror::Error;

pub mod remote;

pub use remote::RemoteEmbedder;

/// Pause inserted between embedding batches to respect provider rate limits.
const BATCH_PAUSE: Duration = Duration::from_millis(100);

/// Errors raised while generating embeddings or comparing vectors.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    /// Input text was empty or whitespace-only.
    #[error("Text cannot be empty")]
    EmptyInput,
    /// HTTP layer failed before receiving a response.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// Provider responded with an unexpected status code.
    #[error("Unexpected provider response ({status}): {body}")]
    UnexpectedStatus {
        /// HTTP status returned by the provider.
        status: StatusCode,
        /// Body payload associated with the failing response.
        body: String,
    },
    /// Provider returned a zero-length vector.
    #[error("Provider returned an empty embedding")]
    EmptyResult,
    /// Two vectors of different lengths were compared.
    #[error("Embeddings must have the same dimension: {left} vs {right}")]
    DimensionMismatch {
        /// Length of the first vector.
        left: usize,
        /// Length of the second vector.
        right: usize,
    },
}

/// A fixed-dimension vector representation of a piece of text.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingVector {
    /// Vector components produced by the model.
    pub values: Vec<f32>,
    /// The text that was embedded, after any truncation.
    pub source_text: String,
    /// Number of components; always equals `values.len()`.
    pub dimension: usize,
}

/// Result of a batch embedding call; failed texts are absent.
#[derive(Debug, Default)]
pub struct BatchEmbeddings {
    /// Successful embeddings, in the relative order of their source texts.
    pub embeddings: Vec<EmbeddingVector>,
}

/// Interface implemented by embedding backends.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Produce an embedding vector for a single text.
    async fn embed(&self, text: &str) -> Result<EmbeddingVector, EmbeddingError>;

    /// Dimensionality configured for the deployed model.
    fn dimension(&self) -> usize;

    /// Model identifier reported for diagnostics.
    fn model_name(&self) -> &str;

    /// Embed many texts in sequential batches of `batch_size`.
    ///
    /// Calls within a batch are issued concurrently and awaited together,
    /// bounding outbound concurrency to the provider. Individual failures are
    /// logged and swallowed; the method never fails wholesale. An empty input
    /// yields an empty result with no provider calls.
    async fn embed_batch(&self, texts: Vec<String>, batch_size: usize) -> BatchEmbeddings {
        if texts.is_empty() {
            return BatchEmbeddings::default();
        }

        let batch_size = batch_size.max(1);
        let total = texts.len();
        let batch_count = total.div_ceil(batch_size);
        let mut embeddings = Vec::with_capacity(total);

        for (batch_index, batch) in texts.chunks(batch_size).enumerate() {
            tracing::debug!(
                batch = batch_index + 1,
                batches = batch_count,
                texts = batch.len(),
                "Embedding batch"
            );

            let results = join_all(batch.iter().map(|text| self.embed(text))).await;
            for result in results {
                match result {
                    Ok(vector) => embeddings.push(vector),
                    Err(error) => {
                        tracing::error!(error = %error, "Failed to embed text");
                    }
                }
            }

            if (batch_index + 1) * batch_size < total {
                tokio::time::sleep(BATCH_PAUSE).await;
            }
        }

        tracing::info!(
            succeeded = embeddings.len(),
            total,
            "Generated embeddings for batch request"
        );
        BatchEmbeddings { embeddings }
    }
}

/// Cosine similarity between two vectors.
///
/// Returns `DimensionMismatch` for vectors of different lengths and `0.0`
/// when either vector has zero magnitude.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32, EmbeddingError> {
    if a.len() != b.len() {
        return Err(EmbeddingError::DimensionMismatch {
            left: a.len(),
            right: b.len(),
        });
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let magnitude = norm_a.sqrt() * norm_b.sqrt();
    if magnitude == 0.0 {
        return Ok(0.0);
    }
    Ok(dot / magnitude)
}
