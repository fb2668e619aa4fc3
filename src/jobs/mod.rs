//! Processing job records and their guarded state machine.
//!
//! A job tracks one asynchronous pipeline run for a document. All status
//! changes go through methods on [`ProcessingJob`] so that illegal
//! transitions are rejected in one place rather than scattered across
//! callers.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

pub mod store;

pub use store::{InMemoryJobStore, JobStore, JobStoreError};

/// Lifecycle state of a processing job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Created but not yet picked up by a worker.
    Pending,
    /// Currently being worked on.
    Processing,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
    /// Cancelled before completion.
    Cancelled,
}

impl JobStatus {
    /// Terminal states admit no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Kind of work a job performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    /// Ingest only: store the raw file.
    Upload,
    /// Chunk previously extracted text.
    Chunking,
    /// Embed previously produced chunks.
    Embedding,
    /// Full pipeline from raw bytes to persisted chunks.
    FullProcess,
}

/// Rejected status change.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum JobTransitionError {
    /// Cancellation was requested for a job that already finished.
    #[error("Cannot cancel a completed or failed job")]
    CancelAfterCompletion,
    /// The requested transition is not allowed from the current status.
    #[error("Cannot {action} a job in status {status}")]
    InvalidTransition {
        /// Verb describing the attempted transition.
        action: &'static str,
        /// Status the job was in when the transition was attempted.
        status: JobStatus,
    },
}

/// One tracked pipeline run for a document.
#[derive(Debug, Clone)]
pub struct ProcessingJob {
    /// Unique job identifier.
    pub id: Uuid,
    /// Document this job processes.
    pub document_id: Uuid,
    /// Kind of work performed.
    pub job_type: JobType,
    /// Current lifecycle state.
    pub status: JobStatus,
    /// Completion percentage, 0 to 100.
    pub progress: u8,
    /// Human-readable description of the current step.
    pub current_step: Option<String>,
    /// Short error description, set on failure.
    pub error_message: Option<String>,
    /// Detailed error context, set on failure.
    pub error_detail: Option<String>,
    /// Number of chunks produced, once known.
    pub total_chunks: Option<usize>,
    /// Number of chunks persisted so far.
    pub processed_chunks: Option<usize>,
    /// When the worker picked the job up.
    pub started_at: Option<OffsetDateTime>,
    /// When the job reached a terminal state.
    pub completed_at: Option<OffsetDateTime>,
    /// When the job was created.
    pub created_at: OffsetDateTime,
    /// When the job was last modified.
    pub updated_at: OffsetDateTime,
}

impl ProcessingJob {
    /// Creates a pending job for a document.
    pub fn new(document_id: Uuid, job_type: JobType) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            id: Uuid::new_v4(),
            document_id,
            job_type,
            status: JobStatus::Pending,
            progress: 0,
            current_step: None,
            error_message: None,
            error_detail: None,
            total_chunks: None,
            processed_chunks: None,
            started_at: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Pending -> Processing. Resets progress and records the start time.
    pub fn start(&mut self) -> Result<(), JobTransitionError> {
        match self.status {
            JobStatus::Pending => {
                self.status = JobStatus::Processing;
                self.progress = 0;
                self.started_at = Some(OffsetDateTime::now_utc());
                self.touch();
                Ok(())
            }
            status => Err(JobTransitionError::InvalidTransition {
                action: "start",
                status,
            }),
        }
    }

    /// Records a progress checkpoint; only valid while Processing.
    ///
    /// Progress is clamped to 100. The step description is updated only when
    /// one is supplied.
    pub fn update_progress(
        &mut self,
        progress: u8,
        step: Option<&str>,
    ) -> Result<(), JobTransitionError> {
        if self.status != JobStatus::Processing {
            return Err(JobTransitionError::InvalidTransition {
                action: "record progress on",
                status: self.status,
            });
        }
        self.progress = progress.min(100);
        if let Some(step) = step {
            self.current_step = Some(step.to_string());
        }
        self.touch();
        Ok(())
    }

    /// Processing -> Completed. Forces progress to 100.
    pub fn complete(&mut self) -> Result<(), JobTransitionError> {
        match self.status {
            JobStatus::Processing => {
                self.status = JobStatus::Completed;
                self.progress = 100;
                self.completed_at = Some(OffsetDateTime::now_utc());
                self.touch();
                Ok(())
            }
            status => Err(JobTransitionError::InvalidTransition {
                action: "complete",
                status,
            }),
        }
    }

    /// Processing -> Pending, recording the error behind the failed delivery.
    ///
    /// Used by the worker when a run fails with retries remaining: the job
    /// returns to the queueable state so the next delivery's `start` is
    /// accepted, while the error fields keep the last failure visible to
    /// anyone polling.
    pub fn requeue(&mut self, message: &str) -> Result<(), JobTransitionError> {
        match self.status {
            JobStatus::Processing => {
                self.status = JobStatus::Pending;
                self.error_message = Some(message.to_string());
                self.started_at = None;
                self.touch();
                Ok(())
            }
            status => Err(JobTransitionError::InvalidTransition {
                action: "requeue",
                status,
            }),
        }
    }

    /// Any non-terminal state -> Failed, recording the error.
    pub fn fail(&mut self, message: &str, detail: Option<&str>) -> Result<(), JobTransitionError> {
        if self.status.is_terminal() {
            return Err(JobTransitionError::InvalidTransition {
                action: "fail",
                status: self.status,
            });
        }
        self.status = JobStatus::Failed;
        self.error_message = Some(message.to_string());
        self.error_detail = detail.map(str::to_string);
        self.completed_at = Some(OffsetDateTime::now_utc());
        self.touch();
        Ok(())
    }

    /// Pending or Processing -> Cancelled.
    ///
    /// Cancelling is advisory: a queued job is dropped before it starts, and
    /// a running pipeline notices the cancelled status at its next checkpoint
    /// and abandons the rest of the run.
    pub fn cancel(&mut self) -> Result<(), JobTransitionError> {
        match self.status {
            JobStatus::Pending | JobStatus::Processing => {
                self.status = JobStatus::Cancelled;
                self.completed_at = Some(OffsetDateTime::now_utc());
                self.touch();
                Ok(())
            }
            JobStatus::Completed | JobStatus::Failed => {
                Err(JobTransitionError::CancelAfterCompletion)
            }
            status => Err(JobTransitionError::InvalidTransition {
                action: "cancel",
                status,
            }),
        }
    }

    fn touch(&mut self) {
        self.updated_at = OffsetDateTime::now_utc();
    }
}
