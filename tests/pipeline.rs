//! End-to-end pipeline tests with in-process collaborators.

use async_trait::async_trait;
use docpipe::config::Config;
use docpipe::documents::{DocumentStatus, DocumentStore, InMemoryDocumentStore};
use docpipe::embedding::{Embedder, EmbeddingError, EmbeddingVector};
use docpipe::extraction::{
    ExtractionError, ExtractionMetadata, ExtractionMethod, ExtractionResult, TextExtractor,
};
use docpipe::jobs::{InMemoryJobStore, JobStatus, JobStore};
use docpipe::processing::{PipelineApi, PipelineService, RunOutcome, SearchRequest};
use docpipe::queue::{DeliveryAttempt, ProcessingQueue, QueueConsumer, RetryPolicy, run_queue_worker};
use docpipe::storage::FsBlobStore;
use docpipe::vectorstore::{ChunkRecord, ChunkStore, ScoredChunk, VectorStoreError};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

fn test_config() -> Config {
    Config {
        embedding_endpoint: "http://127.0.0.1:9/predict".into(),
        embedding_api_key: None,
        embedding_model: "stub-model".into(),
        embedding_dimension: 3,
        embedding_batch_size: 2,
        vector_store_url: "http://127.0.0.1:9".into(),
        vector_store_collection: "document-chunks".into(),
        vector_store_api_key: None,
        ocr_endpoint: None,
        ocr_api_key: None,
        ocr_timeout_secs: 30,
        blob_store_root: "unused".into(),
        queue_max_attempts: 2,
        queue_backoff_secs: 1,
        search_default_limit: 10,
        search_max_limit: 50,
        search_default_score_threshold: 0.7,
        server_port: None,
        log_file: "logs/docpipe.log".into(),
    }
}

/// Extractor returning a canned payload regardless of input.
struct StubExtractor {
    text: String,
}

#[async_trait]
impl TextExtractor for StubExtractor {
    async fn extract(
        &self,
        _bytes: &[u8],
        _filename: &str,
        _mime_type: &str,
    ) -> Result<ExtractionResult, ExtractionError> {
        Ok(ExtractionResult {
            text: self.text.clone(),
            method: ExtractionMethod::Plain,
            metadata: ExtractionMetadata {
                pages: None,
                word_count: self.text.split_whitespace().count(),
                char_count: self.text.chars().count(),
            },
        })
    }
}

/// Extractor that fails its first call and recovers afterwards.
struct FlakyExtractor {
    calls: AtomicUsize,
}

#[async_trait]
impl TextExtractor for FlakyExtractor {
    async fn extract(
        &self,
        _bytes: &[u8],
        _filename: &str,
        _mime_type: &str,
    ) -> Result<ExtractionResult, ExtractionError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            return Err(ExtractionError::Unsupported("transient outage".into()));
        }
        Ok(ExtractionResult {
            text: SAMPLE_TEXT.to_string(),
            method: ExtractionMethod::Plain,
            metadata: ExtractionMetadata {
                pages: None,
                word_count: SAMPLE_TEXT.split_whitespace().count(),
                char_count: SAMPLE_TEXT.chars().count(),
            },
        })
    }
}

/// Extractor that cancels its own job before returning, to exercise a cancel
/// landing while the run is in flight.
#[derive(Default)]
struct CancellingExtractor {
    target: Mutex<Option<(Arc<InMemoryJobStore>, Uuid)>>,
}

#[async_trait]
impl TextExtractor for CancellingExtractor {
    async fn extract(
        &self,
        _bytes: &[u8],
        _filename: &str,
        _mime_type: &str,
    ) -> Result<ExtractionResult, ExtractionError> {
        if let Some((jobs, job_id)) = self.target.lock().await.clone() {
            jobs.cancel(job_id).await.expect("cancel running job");
        }
        Ok(ExtractionResult {
            text: SAMPLE_TEXT.to_string(),
            method: ExtractionMethod::Plain,
            metadata: ExtractionMetadata {
                pages: None,
                word_count: SAMPLE_TEXT.split_whitespace().count(),
                char_count: SAMPLE_TEXT.chars().count(),
            },
        })
    }
}

/// Extractor that always fails, for retry tests.
struct BrokenExtractor;

#[async_trait]
impl TextExtractor for BrokenExtractor {
    async fn extract(
        &self,
        _bytes: &[u8],
        _filename: &str,
        _mime_type: &str,
    ) -> Result<ExtractionResult, ExtractionError> {
        Err(ExtractionError::Unsupported("application/x-broken".into()))
    }
}

/// Deterministic three-dimensional embedder.
struct StubEmbedder;

#[async_trait]
impl Embedder for StubEmbedder {
    async fn embed(&self, text: &str) -> Result<EmbeddingVector, EmbeddingError> {
        if text.trim().is_empty() {
            return Err(EmbeddingError::EmptyInput);
        }
        let length = text.chars().count() as f32;
        Ok(EmbeddingVector {
            values: vec![length, 1.0, 0.5],
            source_text: text.to_string(),
            dimension: 3,
        })
    }

    fn dimension(&self) -> usize {
        3
    }

    fn model_name(&self) -> &str {
        "stub-model"
    }
}

#[derive(Default)]
struct RecordingChunkStore {
    records: Mutex<Vec<ChunkRecord>>,
    deletes: Mutex<Vec<Uuid>>,
    queries: Mutex<Vec<(usize, Option<Uuid>, f32)>>,
    hits: Mutex<Vec<ScoredChunk>>,
}

#[async_trait]
impl ChunkStore for RecordingChunkStore {
    async fn insert_chunks(&self, chunks: Vec<ChunkRecord>) -> Result<usize, VectorStoreError> {
        let count = chunks.len();
        self.records.lock().await.extend(chunks);
        Ok(count)
    }

    async fn delete_by_document(&self, document_id: Uuid) -> Result<(), VectorStoreError> {
        self.deletes.lock().await.push(document_id);
        let mut records = self.records.lock().await;
        records.retain(|record| record.document_id != document_id);
        Ok(())
    }

    async fn find_similar(
        &self,
        _vector: Vec<f32>,
        limit: usize,
        document_id: Option<Uuid>,
        score_threshold: f32,
    ) -> Result<Vec<ScoredChunk>, VectorStoreError> {
        self.queries
            .lock()
            .await
            .push((limit, document_id, score_threshold));
        Ok(self.hits.lock().await.clone())
    }
}

struct Harness {
    pipeline: Arc<PipelineService>,
    documents: Arc<InMemoryDocumentStore>,
    jobs: Arc<InMemoryJobStore>,
    chunks: Arc<RecordingChunkStore>,
    consumer: QueueConsumer,
    _blob_dir: tempfile::TempDir,
}

fn harness(extractor: Arc<dyn TextExtractor>) -> Harness {
    let blob_dir = tempfile::tempdir().expect("tempdir");
    let documents = Arc::new(InMemoryDocumentStore::new());
    let jobs = Arc::new(InMemoryJobStore::new());
    let chunks = Arc::new(RecordingChunkStore::default());
    let (queue, consumer) = ProcessingQueue::new();

    let pipeline = Arc::new(PipelineService::new(
        Arc::new(test_config()),
        documents.clone(),
        jobs.clone(),
        Arc::new(FsBlobStore::new(blob_dir.path())),
        extractor,
        Arc::new(StubEmbedder),
        chunks.clone(),
        Arc::new(queue),
    ));

    Harness {
        pipeline,
        documents,
        jobs,
        chunks,
        consumer,
        _blob_dir: blob_dir,
    }
}

const SAMPLE_TEXT: &str = "The quarterly report covers revenue growth.\n\n\
    Expenses rose moderately in the second half.\n\n\
    The outlook for next year remains positive.";

async fn ingest_sample(harness: &Harness) -> (Uuid, Uuid) {
    let receipt = harness
        .pipeline
        .ingest(
            Uuid::new_v4(),
            "report.txt".to_string(),
            "text/plain".to_string(),
            SAMPLE_TEXT.as_bytes().to_vec(),
        )
        .await
        .expect("ingest");
    let job_id = receipt.job_id.expect("job scheduled");
    (receipt.document.id, job_id)
}

#[tokio::test]
async fn successful_run_completes_job_and_persists_chunks() {
    let harness = harness(Arc::new(StubExtractor {
        text: SAMPLE_TEXT.to_string(),
    }));
    let (document_id, job_id) = ingest_sample(&harness).await;

    let outcome = harness
        .pipeline
        .process_document(document_id, job_id, DeliveryAttempt::only())
        .await
        .expect("pipeline run");
    let outcome = match outcome {
        RunOutcome::Processed(outcome) => outcome,
        RunOutcome::SkippedCancelled => panic!("run should not be skipped"),
    };

    assert!(outcome.chunk_count >= 1);
    assert_eq!(outcome.persisted_chunks, outcome.chunk_count);
    assert_eq!(outcome.failed_chunks, 0);

    let job = harness.jobs.get(job_id).await.expect("job");
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.progress, 100);
    assert_eq!(job.total_chunks, Some(outcome.chunk_count));
    assert_eq!(job.processed_chunks, Some(outcome.persisted_chunks));
    assert!(job.started_at.is_some());
    assert!(job.completed_at.is_some());

    let document = harness.documents.get(document_id).await.expect("document");
    assert_eq!(document.status, DocumentStatus::Completed);

    let records = harness.chunks.records.lock().await;
    assert_eq!(records.len(), outcome.persisted_chunks);
    assert!(records.iter().all(|record| record.document_id == document_id));
    assert!(records.iter().all(|record| record.embedding.len() == 3));

    // Old chunks are cleared before the new ones land.
    let deletes = harness.chunks.deletes.lock().await;
    assert_eq!(deletes.as_slice(), &[document_id]);
}

#[tokio::test]
async fn empty_extraction_fails_the_job_and_document() {
    let harness = harness(Arc::new(StubExtractor {
        text: "   \n\n  ".to_string(),
    }));
    let (document_id, job_id) = ingest_sample(&harness).await;

    let error = harness
        .pipeline
        .process_document(document_id, job_id, DeliveryAttempt::only())
        .await
        .expect_err("empty extraction should fail");
    assert_eq!(error.to_string(), "No text could be extracted from document");

    let job = harness.jobs.get(job_id).await.expect("job");
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(
        job.error_message.as_deref(),
        Some("No text could be extracted from document")
    );

    let document = harness.documents.get(document_id).await.expect("document");
    assert_eq!(document.status, DocumentStatus::Failed);

    assert!(harness.chunks.records.lock().await.is_empty());
}

#[tokio::test]
async fn cancelled_job_is_skipped_without_touching_the_document() {
    let harness = harness(Arc::new(StubExtractor {
        text: SAMPLE_TEXT.to_string(),
    }));
    let (document_id, job_id) = ingest_sample(&harness).await;

    harness.jobs.cancel(job_id).await.expect("cancel");
    let outcome = harness
        .pipeline
        .process_document(document_id, job_id, DeliveryAttempt::only())
        .await
        .expect("skipped run");
    assert!(matches!(outcome, RunOutcome::SkippedCancelled));

    let document = harness.documents.get(document_id).await.expect("document");
    assert_eq!(document.status, DocumentStatus::Pending);
    assert!(harness.chunks.records.lock().await.is_empty());
}

#[tokio::test]
async fn mid_run_cancel_abandons_the_run_without_failing_the_document() {
    let extractor = Arc::new(CancellingExtractor::default());
    let harness = harness(extractor.clone());
    let (document_id, job_id) = ingest_sample(&harness).await;
    *extractor.target.lock().await = Some((harness.jobs.clone(), job_id));

    let outcome = harness
        .pipeline
        .process_document(document_id, job_id, DeliveryAttempt::only())
        .await
        .expect("cancelled run is not an error");
    assert!(matches!(outcome, RunOutcome::SkippedCancelled));

    let job = harness.jobs.get(job_id).await.expect("job");
    assert_eq!(job.status, JobStatus::Cancelled);
    assert!(job.error_message.is_none());

    // The cancel lands between extraction and chunking; the document keeps
    // its in-progress status instead of being marked failed.
    let document = harness.documents.get(document_id).await.expect("document");
    assert_eq!(document.status, DocumentStatus::Processing);
    assert!(harness.chunks.records.lock().await.is_empty());
}

#[tokio::test]
async fn worker_retry_after_transient_failure_completes_the_job() {
    let harness = harness(Arc::new(FlakyExtractor {
        calls: AtomicUsize::new(0),
    }));
    let (document_id, job_id) = ingest_sample(&harness).await;

    let retry = RetryPolicy {
        attempts: 3,
        initial_backoff: Duration::from_millis(1),
    };
    tokio::spawn(run_queue_worker(harness.consumer, harness.pipeline.clone(), retry));

    let jobs = harness.jobs.clone();
    tokio::time::timeout(Duration::from_secs(5), async move {
        loop {
            let job = jobs.get(job_id).await.expect("job");
            assert_ne!(
                job.status,
                JobStatus::Failed,
                "transient failure must not exhaust the job: {:?}",
                job.error_message
            );
            if job.status == JobStatus::Completed {
                assert_eq!(job.progress, 100);
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("job should complete within the timeout");

    let document = harness.documents.get(document_id).await.expect("document");
    assert_eq!(document.status, DocumentStatus::Completed);
    assert!(!harness.chunks.records.lock().await.is_empty());
}

#[tokio::test]
async fn worker_marks_job_failed_after_exhausted_retries() {
    let harness = harness(Arc::new(BrokenExtractor));
    let (_document_id, job_id) = ingest_sample(&harness).await;

    let retry = RetryPolicy {
        attempts: 2,
        initial_backoff: Duration::from_millis(1),
    };
    tokio::spawn(run_queue_worker(harness.consumer, harness.pipeline.clone(), retry));

    let jobs = harness.jobs.clone();
    tokio::time::timeout(Duration::from_secs(5), async move {
        loop {
            let job = jobs.get(job_id).await.expect("job");
            if job.status == JobStatus::Failed {
                assert!(job.error_message.is_some());
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("job should fail within the timeout");
}

#[tokio::test]
async fn search_clamps_limit_and_threshold_before_querying() {
    let harness = harness(Arc::new(StubExtractor {
        text: SAMPLE_TEXT.to_string(),
    }));
    harness.chunks.hits.lock().await.push(ScoredChunk {
        id: "point-1".to_string(),
        document_id: None,
        content: "revenue growth".to_string(),
        score: 0.9,
        metadata: None,
    });

    let request = SearchRequest {
        query: "how did revenue grow".to_string(),
        limit: Some(500),
        document_id: None,
        score_threshold: Some(2.0),
    };
    let hits = harness
        .pipeline
        .find_similar_chunks(&request)
        .await
        .expect("search");
    assert_eq!(hits.len(), 1);

    let queries = harness.chunks.queries.lock().await;
    assert_eq!(queries.len(), 1);
    let (limit, document_id, threshold) = queries[0];
    assert_eq!(limit, 50);
    assert_eq!(document_id, None);
    assert_eq!(threshold, 1.0);

    let defaults = SearchRequest {
        query: "outlook".to_string(),
        limit: None,
        document_id: None,
        score_threshold: None,
    };
    drop(queries);
    harness
        .pipeline
        .find_similar_chunks(&defaults)
        .await
        .expect("search with defaults");
    let queries = harness.chunks.queries.lock().await;
    let (limit, _, threshold) = queries[1];
    assert_eq!(limit, 10);
    assert!((threshold - 0.7).abs() < f32::EPSILON);
}
