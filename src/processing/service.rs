//! Pipeline orchestrator tying the collaborators together.
//!
//! One [`PipelineService`] instance owns every dependency the pipeline needs.
//! `process_document` runs the five stages in order, reporting progress on
//! the job record after each one. A stage failure on the final delivery
//! attempt marks the job and document failed; with retries remaining the job
//! is requeued instead, so the next delivery can start it again. The error
//! is re-raised either way so the queue worker counts the failure and applies
//! its backoff.

use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::Config;
use crate::documents::{Document, DocumentStatus, DocumentStore, DocumentStoreError, NewDocument};
use crate::embedding::{Embedder, EmbeddingVector};
use crate::extraction::{ExtractionMethod, TextExtractor};
use crate::jobs::{JobStatus, JobStore, JobStoreError, JobType, ProcessingJob};
use crate::metrics::{MetricsSnapshot, PipelineMetrics};
use crate::processing::chunking::{ChunkOptions, TextChunk, chunk_text};
use crate::processing::types::{
    IngestReceipt, PipelineError, ProcessingOutcome, RunOutcome, SearchError, SearchRequest,
};
use crate::queue::{DeliveryAttempt, JobProcessor, ProcessingJobData, ProcessingQueue, QueueCounts};
use crate::storage::BlobStore;
use crate::vectorstore::{ChunkRecord, ChunkStore, ScoredChunk};

/// Operations the HTTP surface needs from the pipeline.
///
/// The router is generic over this trait so handler tests can substitute a
/// stub without standing up real collaborators.
#[async_trait]
pub trait PipelineApi: Send + Sync {
    /// Stores an uploaded file and schedules its processing job.
    async fn ingest(
        &self,
        project_id: Uuid,
        name: String,
        mime_type: String,
        bytes: Vec<u8>,
    ) -> Result<IngestReceipt, PipelineError>;

    /// Fetches a job by id.
    async fn job(&self, id: Uuid) -> Result<ProcessingJob, JobStoreError>;

    /// Cancels a job that has not finished.
    async fn cancel_job(&self, id: Uuid) -> Result<ProcessingJob, JobStoreError>;

    /// Fetches a document by id.
    async fn document(&self, id: Uuid) -> Result<Document, DocumentStoreError>;

    /// All jobs for a document, newest first.
    async fn document_jobs(&self, document_id: Uuid) -> Result<Vec<ProcessingJob>, JobStoreError>;

    /// Embeds a query and returns the most similar persisted chunks.
    async fn find_similar_chunks(
        &self,
        request: &SearchRequest,
    ) -> Result<Vec<ScoredChunk>, SearchError>;

    /// Current queue statistics.
    fn queue_counts(&self) -> QueueCounts;

    /// Stops the worker from picking up new deliveries.
    fn pause_queue(&self);

    /// Resumes delivery processing.
    fn resume_queue(&self);

    /// Point-in-time pipeline metrics.
    fn metrics_snapshot(&self) -> MetricsSnapshot;
}

/// Progress handle threaded through the pipeline stages.
///
/// Consuming and re-binding the context at each checkpoint keeps stale
/// handles from reporting progress out of order.
struct JobContext {
    job_id: Uuid,
    progress: u8,
}

impl JobContext {
    async fn advance(
        self,
        jobs: &dyn JobStore,
        progress: u8,
        step: &str,
    ) -> Result<Self, PipelineError> {
        let progress = progress.max(self.progress);
        jobs.update_progress(self.job_id, progress, Some(step)).await?;
        Ok(Self {
            job_id: self.job_id,
            progress,
        })
    }
}

/// Orchestrates the ingestion pipeline and retrieval path.
pub struct PipelineService {
    config: Arc<Config>,
    documents: Arc<dyn DocumentStore>,
    jobs: Arc<dyn JobStore>,
    blobs: Arc<dyn BlobStore>,
    extractor: Arc<dyn TextExtractor>,
    embedder: Arc<dyn Embedder>,
    chunks: Arc<dyn ChunkStore>,
    queue: Arc<ProcessingQueue>,
    metrics: Arc<PipelineMetrics>,
}

impl PipelineService {
    /// Assembles a pipeline from its collaborators.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<Config>,
        documents: Arc<dyn DocumentStore>,
        jobs: Arc<dyn JobStore>,
        blobs: Arc<dyn BlobStore>,
        extractor: Arc<dyn TextExtractor>,
        embedder: Arc<dyn Embedder>,
        chunks: Arc<dyn ChunkStore>,
        queue: Arc<ProcessingQueue>,
    ) -> Self {
        Self {
            config,
            documents,
            jobs,
            blobs,
            extractor,
            embedder,
            chunks,
            queue,
            metrics: Arc::new(PipelineMetrics::new()),
        }
    }

    /// Job store backing this pipeline.
    pub fn jobs(&self) -> &Arc<dyn JobStore> {
        &self.jobs
    }

    /// Document store backing this pipeline.
    pub fn documents(&self) -> &Arc<dyn DocumentStore> {
        &self.documents
    }

    /// Runs the full pipeline for a document.
    ///
    /// On failure the error is re-raised so the queue's retry policy applies.
    /// The job is marked failed (and the document with it) only when the
    /// delivery attempt was the last one; earlier failures requeue the job so
    /// the next delivery can start it again. A job cancelled before or during
    /// the run is skipped without touching the document.
    pub async fn process_document(
        &self,
        document_id: Uuid,
        job_id: Uuid,
        attempt: DeliveryAttempt,
    ) -> Result<RunOutcome, PipelineError> {
        let job = self.jobs.get(job_id).await?;
        if job.status == JobStatus::Cancelled {
            tracing::info!(%job_id, %document_id, "Job was cancelled before it started; skipping");
            return Ok(RunOutcome::SkippedCancelled);
        }

        tracing::info!(%document_id, %job_id, attempt = attempt.number, "Starting document processing");
        match self.run_pipeline(document_id, job_id).await {
            Ok(outcome) => {
                self.metrics
                    .record_document(outcome.persisted_chunks as u64, outcome.failed_chunks as u64);
                tracing::info!(
                    %document_id,
                    chunks = outcome.chunk_count,
                    persisted = outcome.persisted_chunks,
                    "Document processing completed"
                );
                Ok(RunOutcome::Processed(outcome))
            }
            Err(PipelineError::Cancelled) => {
                tracing::info!(%job_id, %document_id, "Job was cancelled mid-run; abandoning remaining stages");
                Ok(RunOutcome::SkippedCancelled)
            }
            Err(error) => {
                tracing::error!(%document_id, %job_id, error = %error, "Document processing failed");
                self.metrics.record_failure();

                if attempt.is_final() {
                    let detail = format!("{error:?}");
                    if let Err(fail_error) = self
                        .jobs
                        .fail(job_id, &error.to_string(), Some(&detail))
                        .await
                    {
                        tracing::error!(%job_id, error = %fail_error, "Could not record job failure");
                    }
                    if let Err(status_error) = self
                        .documents
                        .set_status(document_id, DocumentStatus::Failed)
                        .await
                    {
                        tracing::error!(%document_id, error = %status_error, "Could not mark document failed");
                    }
                } else if let Err(requeue_error) =
                    self.jobs.requeue(job_id, &error.to_string()).await
                {
                    tracing::error!(%job_id, error = %requeue_error, "Could not requeue job for retry");
                }
                Err(error)
            }
        }
    }

    async fn run_pipeline(
        &self,
        document_id: Uuid,
        job_id: Uuid,
    ) -> Result<ProcessingOutcome, PipelineError> {
        self.jobs.start(job_id).await?;
        let ctx = JobContext {
            job_id,
            progress: 0,
        };
        let ctx = ctx
            .advance(self.jobs.as_ref(), 5, "Preparing document")
            .await?;

        let document = self.documents.get(document_id).await?;
        self.documents
            .set_status(document_id, DocumentStatus::Processing)
            .await?;

        let ctx = ctx
            .advance(self.jobs.as_ref(), 10, "Downloading stored file")
            .await?;
        let bytes = self.blobs.download(&document.blob_path).await?;

        let ctx = ctx
            .advance(self.jobs.as_ref(), 20, "Extracting text from document")
            .await?;
        let extraction = self
            .extractor
            .extract(&bytes, &document.name, &document.mime_type)
            .await?;
        if extraction.text.trim().is_empty() {
            return Err(PipelineError::EmptyExtraction);
        }
        tracing::info!(
            %document_id,
            method = %extraction.method,
            chars = extraction.metadata.char_count,
            "Text extracted"
        );

        let ctx = ctx
            .advance(self.jobs.as_ref(), 40, "Chunking document text")
            .await?;
        let text_chunks = chunk_text(&extraction.text, &ChunkOptions::default());
        self.jobs.set_total_chunks(job_id, text_chunks.len()).await?;
        tracing::info!(%document_id, chunks = text_chunks.len(), "Document chunked");

        let step = format!("Generating embeddings for {} chunks", text_chunks.len());
        let ctx = ctx.advance(self.jobs.as_ref(), 50, &step).await?;
        let texts: Vec<String> = text_chunks
            .iter()
            .map(|chunk| chunk.content.clone())
            .collect();
        let batch = self
            .embedder
            .embed_batch(texts, self.config.embedding_batch_size)
            .await;
        if batch.embeddings.len() != text_chunks.len() {
            tracing::warn!(
                %document_id,
                embeddings = batch.embeddings.len(),
                chunks = text_chunks.len(),
                "Some chunks did not receive embeddings"
            );
        }

        let ctx = ctx
            .advance(self.jobs.as_ref(), 80, "Saving chunks to the vector store")
            .await?;
        let (records, failed_chunks) =
            pair_chunks_with_embeddings(document_id, &text_chunks, &batch.embeddings, extraction.method);

        // Redeliveries overwrite rather than duplicate.
        self.chunks.delete_by_document(document_id).await?;
        let persisted = self.chunks.insert_chunks(records).await?;
        self.jobs.set_processed_chunks(job_id, persisted).await?;
        tracing::info!(%document_id, persisted, failed = failed_chunks, "Chunks saved");

        ctx.advance(self.jobs.as_ref(), 95, "Finalizing").await?;
        self.documents
            .set_status(document_id, DocumentStatus::Completed)
            .await?;
        self.jobs.complete(job_id).await?;

        Ok(ProcessingOutcome {
            document_id,
            chunk_count: text_chunks.len(),
            persisted_chunks: persisted,
            failed_chunks,
            extraction_method: extraction.method,
            char_count: extraction.metadata.char_count,
        })
    }

    /// Embeds a query and returns the most similar persisted chunks.
    ///
    /// Limits and thresholds are clamped to the configured bounds before the
    /// store is queried.
    pub async fn find_similar_chunks(
        &self,
        request: &SearchRequest,
    ) -> Result<Vec<ScoredChunk>, SearchError> {
        let limit = request
            .limit
            .unwrap_or(self.config.search_default_limit)
            .clamp(1, self.config.search_max_limit);
        let threshold = request
            .score_threshold
            .unwrap_or(self.config.search_default_score_threshold)
            .clamp(0.0, 1.0);

        let query_vector = self.embedder.embed(&request.query).await?;
        let expected = self.config.embedding_dimension;
        if query_vector.dimension != expected {
            return Err(SearchError::DimensionMismatch {
                expected,
                actual: query_vector.dimension,
            });
        }

        let hits = self
            .chunks
            .find_similar(query_vector.values, limit, request.document_id, threshold)
            .await?;
        tracing::debug!(hits = hits.len(), limit, threshold, "Similarity search served");
        Ok(hits)
    }
}

#[async_trait]
impl JobProcessor for PipelineService {
    async fn process(
        &self,
        data: ProcessingJobData,
        attempt: DeliveryAttempt,
    ) -> anyhow::Result<()> {
        self.process_document(data.document_id, data.job_id, attempt)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl PipelineApi for PipelineService {
    async fn ingest(
        &self,
        project_id: Uuid,
        name: String,
        mime_type: String,
        bytes: Vec<u8>,
    ) -> Result<IngestReceipt, PipelineError> {
        let blob = self
            .blobs
            .upload(&bytes, &project_id.to_string(), &name)
            .await?;
        let document = self
            .documents
            .create(NewDocument {
                project_id,
                name,
                blob_path: blob.path,
                mime_type,
                file_size: blob.size,
            })
            .await?;

        // Scheduling failures leave the upload intact; the document can be
        // reprocessed once the queue recovers.
        let job_id = match self.jobs.create(document.id, JobType::FullProcess).await {
            Ok(job) => {
                let data = ProcessingJobData {
                    document_id: document.id,
                    job_id: job.id,
                };
                match self.queue.enqueue(data) {
                    Ok(()) => Some(job.id),
                    Err(error) => {
                        tracing::error!(
                            document_id = %document.id,
                            error = %error,
                            "Could not enqueue processing job"
                        );
                        None
                    }
                }
            }
            Err(error) => {
                tracing::error!(
                    document_id = %document.id,
                    error = %error,
                    "Could not create processing job"
                );
                None
            }
        };

        tracing::info!(
            document_id = %document.id,
            project_id = %project_id,
            size = document.file_size,
            scheduled = job_id.is_some(),
            "Document uploaded"
        );
        Ok(IngestReceipt { document, job_id })
    }

    async fn job(&self, id: Uuid) -> Result<ProcessingJob, JobStoreError> {
        self.jobs.get(id).await
    }

    async fn cancel_job(&self, id: Uuid) -> Result<ProcessingJob, JobStoreError> {
        let job = self.jobs.cancel(id).await?;
        tracing::info!(job_id = %id, "Job cancelled");
        Ok(job)
    }

    async fn document(&self, id: Uuid) -> Result<Document, DocumentStoreError> {
        self.documents.get(id).await
    }

    async fn document_jobs(&self, document_id: Uuid) -> Result<Vec<ProcessingJob>, JobStoreError> {
        self.jobs.find_by_document(document_id).await
    }

    async fn find_similar_chunks(
        &self,
        request: &SearchRequest,
    ) -> Result<Vec<ScoredChunk>, SearchError> {
        PipelineService::find_similar_chunks(self, request).await
    }

    fn queue_counts(&self) -> QueueCounts {
        self.queue.counts()
    }

    fn pause_queue(&self) {
        self.queue.pause();
    }

    fn resume_queue(&self) {
        self.queue.resume();
    }

    fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }
}

/// Pairs chunks with their embeddings by content equality.
///
/// Batch embedding drops failed texts, so the pairing cannot rely on index
/// alignment. Chunks without a matching embedding are counted and skipped.
fn pair_chunks_with_embeddings(
    document_id: Uuid,
    chunks: &[TextChunk],
    embeddings: &[EmbeddingVector],
    method: ExtractionMethod,
) -> (Vec<ChunkRecord>, usize) {
    let by_text: HashMap<&str, &EmbeddingVector> = embeddings
        .iter()
        .map(|embedding| (embedding.source_text.as_str(), embedding))
        .collect();

    let mut records = Vec::with_capacity(chunks.len());
    let mut failed = 0usize;
    for chunk in chunks {
        match by_text.get(chunk.content.as_str()) {
            Some(embedding) => records.push(ChunkRecord {
                document_id,
                content: chunk.content.clone(),
                embedding: embedding.values.clone(),
                metadata: chunk_payload_metadata(chunk, method),
            }),
            None => {
                failed += 1;
                tracing::warn!(index = chunk.index, "Skipping chunk without an embedding");
            }
        }
    }
    (records, failed)
}

fn chunk_payload_metadata(chunk: &TextChunk, method: ExtractionMethod) -> Value {
    json!({
        "index": chunk.index,
        "startPosition": chunk.start_position,
        "endPosition": chunk.end_position,
        "wordCount": chunk.metadata.word_count,
        "sentenceCount": chunk.metadata.sentence_count,
        "paragraphIndex": chunk.metadata.paragraph_index,
        "extractionMethod": method.as_str(),
    })
}
