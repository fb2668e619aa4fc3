//! Persistence interface for processing jobs.

use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{JobStatus, JobTransitionError, JobType, ProcessingJob};

/// Errors from job store operations.
#[derive(Debug, Error)]
pub enum JobStoreError {
    /// No job with the given id.
    #[error("Processing job {0} not found")]
    NotFound(Uuid),
    /// The requested status change was rejected.
    #[error(transparent)]
    Transition(#[from] JobTransitionError),
}

/// Storage backend for processing jobs.
///
/// Every mutating method returns the updated job so callers can report the
/// post-transition state without a second read.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Creates a pending job for a document.
    async fn create(
        &self,
        document_id: Uuid,
        job_type: JobType,
    ) -> Result<ProcessingJob, JobStoreError>;

    /// Fetches a job by id.
    async fn get(&self, id: Uuid) -> Result<ProcessingJob, JobStoreError>;

    /// Marks a job as started.
    async fn start(&self, id: Uuid) -> Result<ProcessingJob, JobStoreError>;

    /// Records a progress checkpoint.
    async fn update_progress(
        &self,
        id: Uuid,
        progress: u8,
        step: Option<&str>,
    ) -> Result<ProcessingJob, JobStoreError>;

    /// Records the number of chunks the document produced.
    async fn set_total_chunks(&self, id: Uuid, total: usize)
    -> Result<ProcessingJob, JobStoreError>;

    /// Records the number of chunks persisted so far.
    async fn set_processed_chunks(
        &self,
        id: Uuid,
        processed: usize,
    ) -> Result<ProcessingJob, JobStoreError>;

    /// Marks a job as completed.
    async fn complete(&self, id: Uuid) -> Result<ProcessingJob, JobStoreError>;

    /// Returns a running job to pending after a failed delivery with retries left.
    async fn requeue(&self, id: Uuid, message: &str) -> Result<ProcessingJob, JobStoreError>;

    /// Marks a job as failed with an error description.
    async fn fail(
        &self,
        id: Uuid,
        message: &str,
        detail: Option<&str>,
    ) -> Result<ProcessingJob, JobStoreError>;

    /// Cancels a job that has not finished.
    async fn cancel(&self, id: Uuid) -> Result<ProcessingJob, JobStoreError>;

    /// All jobs for a document, newest first.
    async fn find_by_document(
        &self,
        document_id: Uuid,
    ) -> Result<Vec<ProcessingJob>, JobStoreError>;

    /// All jobs currently in the given status, oldest first.
    async fn find_by_status(&self, status: JobStatus)
    -> Result<Vec<ProcessingJob>, JobStoreError>;
}

/// In-process job store backed by a `HashMap`.
#[derive(Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<Uuid, ProcessingJob>>,
}

impl InMemoryJobStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    async fn mutate<F>(&self, id: Uuid, apply: F) -> Result<ProcessingJob, JobStoreError>
    where
        F: FnOnce(&mut ProcessingJob) -> Result<(), JobTransitionError>,
    {
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(&id).ok_or(JobStoreError::NotFound(id))?;
        apply(job)?;
        Ok(job.clone())
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create(
        &self,
        document_id: Uuid,
        job_type: JobType,
    ) -> Result<ProcessingJob, JobStoreError> {
        let job = ProcessingJob::new(document_id, job_type);
        self.jobs.write().await.insert(job.id, job.clone());
        Ok(job)
    }

    async fn get(&self, id: Uuid) -> Result<ProcessingJob, JobStoreError> {
        self.jobs
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(JobStoreError::NotFound(id))
    }

    async fn start(&self, id: Uuid) -> Result<ProcessingJob, JobStoreError> {
        self.mutate(id, |job| job.start()).await
    }

    async fn update_progress(
        &self,
        id: Uuid,
        progress: u8,
        step: Option<&str>,
    ) -> Result<ProcessingJob, JobStoreError> {
        self.mutate(id, |job| job.update_progress(progress, step))
            .await
    }

    async fn set_total_chunks(
        &self,
        id: Uuid,
        total: usize,
    ) -> Result<ProcessingJob, JobStoreError> {
        self.mutate(id, |job| {
            job.total_chunks = Some(total);
            Ok(())
        })
        .await
    }

    async fn set_processed_chunks(
        &self,
        id: Uuid,
        processed: usize,
    ) -> Result<ProcessingJob, JobStoreError> {
        self.mutate(id, |job| {
            job.processed_chunks = Some(processed);
            Ok(())
        })
        .await
    }

    async fn complete(&self, id: Uuid) -> Result<ProcessingJob, JobStoreError> {
        self.mutate(id, |job| job.complete()).await
    }

    async fn requeue(&self, id: Uuid, message: &str) -> Result<ProcessingJob, JobStoreError> {
        self.mutate(id, |job| job.requeue(message)).await
    }

    async fn fail(
        &self,
        id: Uuid,
        message: &str,
        detail: Option<&str>,
    ) -> Result<ProcessingJob, JobStoreError> {
        self.mutate(id, |job| job.fail(message, detail)).await
    }

    async fn cancel(&self, id: Uuid) -> Result<ProcessingJob, JobStoreError> {
        self.mutate(id, |job| job.cancel()).await
    }

    async fn find_by_document(
        &self,
        document_id: Uuid,
    ) -> Result<Vec<ProcessingJob>, JobStoreError> {
        let jobs = self.jobs.read().await;
        let mut matched: Vec<ProcessingJob> = jobs
            .values()
            .filter(|job| job.document_id == document_id)
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matched)
    }

    async fn find_by_status(
        &self,
        status: JobStatus,
    ) -> Result<Vec<ProcessingJob>, JobStoreError> {
        let jobs = self.jobs.read().await;
        let mut matched: Vec<ProcessingJob> = jobs
            .values()
            .filter(|job| job.status == status)
            .cloned()
            .collect();
        matched.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(matched)
    }
}
