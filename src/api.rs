//! HTTP surface for the document pipeline.
//!
//! This module exposes a compact Axum router:
//!
//! - `POST /documents?project_id=&name=` – Accept raw file bytes, store them,
//!   and schedule an asynchronous processing job. Returns `202 Accepted` with
//!   the document and job identifiers.
//! - `GET /documents/{id}` – Inspect a document record.
//! - `GET /documents/{id}/jobs` – Job history for a document, newest first.
//! - `GET /jobs/{id}` – Poll a job's status and progress.
//! - `POST /jobs/{id}/cancel` – Cancel a job that has not finished.
//! - `POST /search` – Semantic similarity search over persisted chunks.
//! - `GET /queue/stats`, `POST /queue/pause`, `POST /queue/resume` – Queue
//!   introspection and control.
//! - `GET /metrics` – Pipeline counters for observability dashboards.

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use uuid::Uuid;

use crate::documents::{Document, DocumentStoreError};
use crate::jobs::{JobStoreError, ProcessingJob};
use crate::metrics::MetricsSnapshot;
use crate::processing::{PipelineApi, PipelineError, SearchError, SearchRequest};
use crate::queue::QueueCounts;
use crate::vectorstore::ScoredChunk;

/// Build the HTTP router exposing the pipeline API surface.
pub fn create_router<S>(service: Arc<S>) -> Router
where
    S: PipelineApi + 'static,
{
    Router::new()
        .route("/documents", post(upload_document::<S>))
        .route("/documents/:id", get(get_document::<S>))
        .route("/documents/:id/jobs", get(get_document_jobs::<S>))
        .route("/jobs/:id", get(get_job::<S>))
        .route("/jobs/:id/cancel", post(cancel_job::<S>))
        .route("/search", post(search_chunks::<S>))
        .route("/queue/stats", get(queue_stats::<S>))
        .route("/queue/pause", post(pause_queue::<S>))
        .route("/queue/resume", post(resume_queue::<S>))
        .route("/metrics", get(get_metrics::<S>))
        .with_state(service)
}

/// Query parameters for the `POST /documents` endpoint.
#[derive(Deserialize)]
struct UploadParams {
    /// Project the document belongs to.
    project_id: Uuid,
    /// Original file name.
    name: String,
}

/// Success response for the `POST /documents` endpoint.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UploadResponse {
    document: DocumentView,
    /// Scheduled processing job; absent when scheduling failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    job_id: Option<Uuid>,
}

/// Accept raw file bytes and schedule their processing.
async fn upload_document<S>(
    State(service): State<Arc<S>>,
    Query(params): Query<UploadParams>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<UploadResponse>), AppError>
where
    S: PipelineApi,
{
    if body.is_empty() {
        return Err(AppError::BadRequest("Uploaded file is empty".to_string()));
    }
    if params.name.trim().is_empty() {
        return Err(AppError::BadRequest("File name is required".to_string()));
    }

    let mime_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_string();

    let receipt = service
        .ingest(params.project_id, params.name, mime_type, body.to_vec())
        .await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(UploadResponse {
            document: DocumentView::from(&receipt.document),
            job_id: receipt.job_id,
        }),
    ))
}

/// Inspect a document record.
async fn get_document<S>(
    State(service): State<Arc<S>>,
    Path(id): Path<Uuid>,
) -> Result<Json<DocumentView>, AppError>
where
    S: PipelineApi,
{
    let document = service.document(id).await?;
    Ok(Json(DocumentView::from(&document)))
}

/// Job history for a document, newest first.
async fn get_document_jobs<S>(
    State(service): State<Arc<S>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<JobView>>, AppError>
where
    S: PipelineApi,
{
    let jobs = service.document_jobs(id).await?;
    Ok(Json(jobs.iter().map(JobView::from).collect()))
}

/// Poll a job's status and progress.
async fn get_job<S>(
    State(service): State<Arc<S>>,
    Path(id): Path<Uuid>,
) -> Result<Json<JobView>, AppError>
where
    S: PipelineApi,
{
    let job = service.job(id).await?;
    Ok(Json(JobView::from(&job)))
}

/// Cancel a job that has not finished.
async fn cancel_job<S>(
    State(service): State<Arc<S>>,
    Path(id): Path<Uuid>,
) -> Result<Json<JobView>, AppError>
where
    S: PipelineApi,
{
    let job = service.cancel_job(id).await?;
    Ok(Json(JobView::from(&job)))
}

/// Response body for `POST /search`.
#[derive(Serialize)]
struct SearchResponse {
    results: Vec<SearchHit>,
    count: usize,
}

/// One similarity hit.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SearchHit {
    id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    document_id: Option<Uuid>,
    content: String,
    score: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    metadata: Option<Value>,
}

/// Semantic similarity search over persisted chunks.
async fn search_chunks<S>(
    State(service): State<Arc<S>>,
    Json(request): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, AppError>
where
    S: PipelineApi,
{
    if request.query.trim().is_empty() {
        return Err(AppError::BadRequest("Query text is required".to_string()));
    }

    let hits = service.find_similar_chunks(&request).await?;
    let results: Vec<SearchHit> = hits.into_iter().map(SearchHit::from).collect();
    let count = results.len();
    Ok(Json(SearchResponse { results, count }))
}

/// Queue statistics snapshot.
async fn queue_stats<S>(State(service): State<Arc<S>>) -> Json<QueueCounts>
where
    S: PipelineApi,
{
    Json(service.queue_counts())
}

/// Stop the worker from picking up new deliveries.
async fn pause_queue<S>(State(service): State<Arc<S>>) -> StatusCode
where
    S: PipelineApi,
{
    service.pause_queue();
    StatusCode::NO_CONTENT
}

/// Resume delivery processing.
async fn resume_queue<S>(State(service): State<Arc<S>>) -> StatusCode
where
    S: PipelineApi,
{
    service.resume_queue();
    StatusCode::NO_CONTENT
}

/// Pipeline counters for observability dashboards.
async fn get_metrics<S>(State(service): State<Arc<S>>) -> Json<MetricsSnapshot>
where
    S: PipelineApi,
{
    Json(service.metrics_snapshot())
}

/// Serialized document record.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DocumentView {
    id: Uuid,
    project_id: Uuid,
    name: String,
    mime_type: String,
    file_size: u64,
    status: crate::documents::DocumentStatus,
    uploaded_at: String,
}

impl From<&Document> for DocumentView {
    fn from(document: &Document) -> Self {
        Self {
            id: document.id,
            project_id: document.project_id,
            name: document.name.clone(),
            mime_type: document.mime_type.clone(),
            file_size: document.file_size,
            status: document.status,
            uploaded_at: format_timestamp(document.uploaded_at),
        }
    }
}

/// Serialized job record.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct JobView {
    id: Uuid,
    document_id: Uuid,
    #[serde(rename = "type")]
    job_type: crate::jobs::JobType,
    status: crate::jobs::JobStatus,
    progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    current_step: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    total_chunks: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    processed_chunks: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    started_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    completed_at: Option<String>,
    created_at: String,
}

impl From<&ProcessingJob> for JobView {
    fn from(job: &ProcessingJob) -> Self {
        Self {
            id: job.id,
            document_id: job.document_id,
            job_type: job.job_type,
            status: job.status,
            progress: job.progress,
            current_step: job.current_step.clone(),
            error_message: job.error_message.clone(),
            total_chunks: job.total_chunks,
            processed_chunks: job.processed_chunks,
            started_at: job.started_at.map(format_timestamp),
            completed_at: job.completed_at.map(format_timestamp),
            created_at: format_timestamp(job.created_at),
        }
    }
}

impl From<ScoredChunk> for SearchHit {
    fn from(chunk: ScoredChunk) -> Self {
        Self {
            id: chunk.id,
            document_id: chunk.document_id,
            content: chunk.content,
            score: chunk.score,
            metadata: chunk.metadata,
        }
    }
}

fn format_timestamp(timestamp: OffsetDateTime) -> String {
    timestamp
        .format(&Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

enum AppError {
    BadRequest(String),
    Job(JobStoreError),
    Document(DocumentStoreError),
    Pipeline(PipelineError),
    Search(SearchError),
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Job(JobStoreError::NotFound(_)) | Self::Document(DocumentStoreError::NotFound(_)) => {
                StatusCode::NOT_FOUND
            }
            Self::Job(JobStoreError::Transition(_)) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> String {
        match self {
            Self::BadRequest(message) => message.clone(),
            Self::Job(inner) => inner.to_string(),
            Self::Document(inner) => inner.to_string(),
            Self::Pipeline(inner) => inner.to_string(),
            Self::Search(inner) => inner.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        (status, Json(json!({ "error": self.message() }))).into_response()
    }
}

impl From<JobStoreError> for AppError {
    fn from(inner: JobStoreError) -> Self {
        Self::Job(inner)
    }
}

impl From<DocumentStoreError> for AppError {
    fn from(inner: DocumentStoreError) -> Self {
        Self::Document(inner)
    }
}

impl From<PipelineError> for AppError {
    fn from(inner: PipelineError) -> Self {
        Self::Pipeline(inner)
    }
}

impl From<SearchError> for AppError {
    fn from(inner: SearchError) -> Self {
        Self::Search(inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::documents::DocumentStatus;
    use crate::jobs::{JobTransitionError, JobType};
    use crate::processing::IngestReceipt;
    use async_trait::async_trait;
    use axum::{
        body::{Body, to_bytes},
        http::{Method, Request},
    };
    use tokio::sync::Mutex;
    use tower::ServiceExt;

    #[derive(Clone, Debug)]
    struct IngestCall {
        project_id: Uuid,
        name: String,
        mime_type: String,
        bytes: Vec<u8>,
    }

    struct StubPipeline {
        ingest_calls: Arc<Mutex<Vec<IngestCall>>>,
        search_calls: Arc<Mutex<Vec<SearchRequest>>>,
        job: Option<ProcessingJob>,
        cancel_result: Option<JobTransitionError>,
        hits: Vec<ScoredChunk>,
    }

    impl StubPipeline {
        fn new() -> Self {
            Self {
                ingest_calls: Arc::new(Mutex::new(Vec::new())),
                search_calls: Arc::new(Mutex::new(Vec::new())),
                job: None,
                cancel_result: None,
                hits: Vec::new(),
            }
        }

        fn with_job(mut self, job: ProcessingJob) -> Self {
            self.job = Some(job);
            self
        }

        fn with_cancel_error(mut self, error: JobTransitionError) -> Self {
            self.cancel_result = Some(error);
            self
        }

        fn with_hits(mut self, hits: Vec<ScoredChunk>) -> Self {
            self.hits = hits;
            self
        }
    }

    #[async_trait]
    impl PipelineApi for StubPipeline {
        async fn ingest(
            &self,
            project_id: Uuid,
            name: String,
            mime_type: String,
            bytes: Vec<u8>,
        ) -> Result<IngestReceipt, PipelineError> {
            self.ingest_calls.lock().await.push(IngestCall {
                project_id,
                name: name.clone(),
                mime_type: mime_type.clone(),
                bytes: bytes.clone(),
            });
            let document = Document {
                id: Uuid::new_v4(),
                project_id,
                name,
                blob_path: "blobs/test".to_string(),
                mime_type,
                file_size: bytes.len() as u64,
                status: DocumentStatus::Pending,
                uploaded_at: OffsetDateTime::now_utc(),
            };
            Ok(IngestReceipt {
                document,
                job_id: Some(Uuid::new_v4()),
            })
        }

        async fn job(&self, id: Uuid) -> Result<ProcessingJob, JobStoreError> {
            self.job.clone().ok_or(JobStoreError::NotFound(id))
        }

        async fn cancel_job(&self, id: Uuid) -> Result<ProcessingJob, JobStoreError> {
            if let Some(error) = self.cancel_result.clone() {
                return Err(JobStoreError::Transition(error));
            }
            self.job.clone().ok_or(JobStoreError::NotFound(id))
        }

        async fn document(&self, id: Uuid) -> Result<Document, DocumentStoreError> {
            Err(DocumentStoreError::NotFound(id))
        }

        async fn document_jobs(
            &self,
            _document_id: Uuid,
        ) -> Result<Vec<ProcessingJob>, JobStoreError> {
            Ok(self.job.clone().into_iter().collect())
        }

        async fn find_similar_chunks(
            &self,
            request: &SearchRequest,
        ) -> Result<Vec<ScoredChunk>, SearchError> {
            self.search_calls.lock().await.push(request.clone());
            Ok(self.hits.clone())
        }

        fn queue_counts(&self) -> QueueCounts {
            QueueCounts {
                waiting: 1,
                active: 0,
                completed: 4,
                failed: 0,
                delayed: 0,
                total: 5,
            }
        }

        fn pause_queue(&self) {}

        fn resume_queue(&self) {}

        fn metrics_snapshot(&self) -> MetricsSnapshot {
            MetricsSnapshot {
                documents_processed: 4,
                documents_failed: 1,
                chunks_persisted: 40,
                embedding_failures: 2,
            }
        }
    }

    async fn body_json(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body bytes");
        serde_json::from_slice(&bytes).expect("json body")
    }

    #[tokio::test]
    async fn upload_route_schedules_processing() {
        let service = Arc::new(StubPipeline::new());
        let app = create_router(service.clone());
        let project_id = Uuid::new_v4();

        let response = app
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri(format!(
                        "/documents?project_id={project_id}&name=report.pdf"
                    ))
                    .header("content-type", "application/pdf")
                    .body(Body::from(&b"%PDF-1.7 content"[..]))
                    .expect("request"),
            )
            .await
            .expect("router response");

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let json = body_json(response).await;
        assert!(json["jobId"].is_string());
        assert_eq!(json["document"]["status"], "pending");

        let calls = service.ingest_calls.lock().await;
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].project_id, project_id);
        assert_eq!(calls[0].name, "report.pdf");
        assert_eq!(calls[0].mime_type, "application/pdf");
        assert_eq!(calls[0].bytes, b"%PDF-1.7 content");
    }

    #[tokio::test]
    async fn empty_upload_is_rejected() {
        let app = create_router(Arc::new(StubPipeline::new()));
        let response = app
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri(format!(
                        "/documents?project_id={}&name=empty.txt",
                        Uuid::new_v4()
                    ))
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("router response");

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert_eq!(json["error"], "Uploaded file is empty");
    }

    #[tokio::test]
    async fn job_route_serializes_progress() {
        let mut job = ProcessingJob::new(Uuid::new_v4(), JobType::FullProcess);
        job.start().expect("start");
        job.update_progress(50, Some("Generating embeddings for 8 chunks"))
            .expect("progress");
        let job_id = job.id;

        let app = create_router(Arc::new(StubPipeline::new().with_job(job)));
        let response = app
            .oneshot(
                Request::builder()
                    .uri(format!("/jobs/{job_id}"))
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("router response");

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["id"], job_id.to_string());
        assert_eq!(json["status"], "processing");
        assert_eq!(json["progress"], 50);
        assert_eq!(json["currentStep"], "Generating embeddings for 8 chunks");
        assert!(json["startedAt"].is_string());
    }

    #[tokio::test]
    async fn unknown_job_is_404() {
        let app = create_router(Arc::new(StubPipeline::new()));
        let response = app
            .oneshot(
                Request::builder()
                    .uri(format!("/jobs/{}", Uuid::new_v4()))
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("router response");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn cancelling_a_finished_job_is_a_conflict() {
        let app = create_router(Arc::new(
            StubPipeline::new().with_cancel_error(JobTransitionError::CancelAfterCompletion),
        ));
        let response = app
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri(format!("/jobs/{}/cancel", Uuid::new_v4()))
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("router response");

        assert_eq!(response.status(), StatusCode::CONFLICT);
        let json = body_json(response).await;
        assert_eq!(json["error"], "Cannot cancel a completed or failed job");
    }

    #[tokio::test]
    async fn search_route_forwards_parameters_and_returns_hits() {
        let document_id = Uuid::new_v4();
        let hits = vec![ScoredChunk {
            id: "point-1".to_string(),
            document_id: Some(document_id),
            content: "matching text".to_string(),
            score: 0.88,
            metadata: Some(json!({ "index": 2 })),
        }];
        let service = Arc::new(StubPipeline::new().with_hits(hits));
        let app = create_router(service.clone());

        let payload = json!({
            "query": "what does the report say",
            "limit": 3,
            "documentId": document_id,
            "scoreThreshold": 0.6
        });
        let response = app
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/search")
                    .header("content-type", "application/json")
                    .body(Body::from(payload.to_string()))
                    .expect("request"),
            )
            .await
            .expect("router response");

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["count"], 1);
        assert_eq!(json["results"][0]["content"], "matching text");
        assert_eq!(json["results"][0]["metadata"]["index"], 2);

        let calls = service.search_calls.lock().await;
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].query, "what does the report say");
        assert_eq!(calls[0].limit, Some(3));
        assert_eq!(calls[0].document_id, Some(document_id));
    }

    #[tokio::test]
    async fn blank_search_query_is_rejected() {
        let app = create_router(Arc::new(StubPipeline::new()));
        let response = app
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/search")
                    .header("content-type", "application/json")
                    .body(Body::from(json!({ "query": "  " }).to_string()))
                    .expect("request"),
            )
            .await
            .expect("router response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn queue_and_metrics_routes_serve_snapshots() {
        let app = create_router(Arc::new(StubPipeline::new()));
        let stats = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/queue/stats")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("router response");
        assert_eq!(stats.status(), StatusCode::OK);
        let json = body_json(stats).await;
        assert_eq!(json["waiting"], 1);
        assert_eq!(json["total"], 5);

        let metrics = app
            .oneshot(
                Request::builder()
                    .uri("/metrics")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("router response");
        assert_eq!(metrics.status(), StatusCode::OK);
        let json = body_json(metrics).await;
        assert_eq!(json["documents_processed"], 4);
        assert_eq!(json["chunks_persisted"], 40);
    }

    #[tokio::test]
    async fn pause_and_resume_return_no_content() {
        let app = create_router(Arc::new(StubPipeline::new()));
        let pause = app
            .clone()
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/queue/pause")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("router response");
        assert_eq!(pause.status(), StatusCode::NO_CONTENT);

        let resume = app
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/queue/resume")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("router response");
        assert_eq!(resume.status(), StatusCode::NO_CONTENT);
    }
}
