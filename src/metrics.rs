use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters describing pipeline activity.
#[derive(Default)]
pub struct PipelineMetrics {
    documents_processed: AtomicU64,
    documents_failed: AtomicU64,
    chunks_persisted: AtomicU64,
    embedding_failures: AtomicU64,
}

impl PipelineMetrics {
    /// Create an empty metrics accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successfully processed document with its persisted and failed chunk counts.
    pub fn record_document(&self, chunks_persisted: u64, embedding_failures: u64) {
        self.documents_processed.fetch_add(1, Ordering::Relaxed);
        self.chunks_persisted
            .fetch_add(chunks_persisted, Ordering::Relaxed);
        self.embedding_failures
            .fetch_add(embedding_failures, Ordering::Relaxed);
    }

    /// Record a document whose processing run failed.
    pub fn record_failure(&self) {
        self.documents_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Return a snapshot of the current counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            documents_processed: self.documents_processed.load(Ordering::Relaxed),
            documents_failed: self.documents_failed.load(Ordering::Relaxed),
            chunks_persisted: self.chunks_persisted.load(Ordering::Relaxed),
            embedding_failures: self.embedding_failures.load(Ordering::Relaxed),
        }
    }
}

/// Immutable view of pipeline counters used for reporting.
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct MetricsSnapshot {
    /// Documents processed to completion since startup.
    pub documents_processed: u64,
    /// Documents whose processing run ended in failure.
    pub documents_failed: u64,
    /// Total chunks persisted across all processed documents.
    pub chunks_persisted: u64,
    /// Chunks dropped because their embedding could not be generated.
    pub embedding_failures: u64,
}
