//! In-process delivery queue driving asynchronous document processing.
//!
//! Uploads enqueue a [`ProcessingJobData`] and return immediately; a worker
//! task drains the queue and runs the pipeline. Failed deliveries are retried
//! with exponential backoff up to a configured attempt limit, and the queue
//! keeps Bull-style counters so operators can see where work is piling up.

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

/// Identifies one pipeline run to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessingJobData {
    /// Document to process.
    pub document_id: Uuid,
    /// Job tracking the run.
    pub job_id: Uuid,
}

/// Position of one delivery within its retry budget.
///
/// The processor needs to know whether a failure can still be retried: a
/// transient failure on a non-final attempt must leave the job in a state the
/// next delivery can pick up again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryAttempt {
    /// 1-based attempt number.
    pub number: u32,
    /// Total attempts the policy allows.
    pub allowed: u32,
}

impl DeliveryAttempt {
    /// A one-shot delivery with no retries remaining.
    pub fn only() -> Self {
        Self {
            number: 1,
            allowed: 1,
        }
    }

    /// Whether the retry budget is exhausted after this delivery.
    pub fn is_final(self) -> bool {
        self.number >= self.allowed
    }
}

/// Work consumed off the queue by a worker.
#[async_trait]
pub trait JobProcessor: Send + Sync {
    /// Runs one delivery to completion.
    async fn process(&self, data: ProcessingJobData, attempt: DeliveryAttempt)
    -> anyhow::Result<()>;
}

/// Retry behavior for failed deliveries.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts per delivery, including the first.
    pub attempts: u32,
    /// Backoff before the first retry; doubles on each subsequent retry.
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            initial_backoff: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Backoff applied after the given 1-based failed attempt.
    fn backoff_after(&self, attempt: u32) -> Duration {
        self.initial_backoff
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
    }
}

/// Errors from queue operations.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The worker side of the queue has shut down.
    #[error("Processing queue is closed")]
    Closed,
}

/// Point-in-time queue statistics.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct QueueCounts {
    /// Deliveries enqueued but not yet picked up.
    pub waiting: u64,
    /// Deliveries currently being processed.
    pub active: u64,
    /// Deliveries that finished successfully.
    pub completed: u64,
    /// Deliveries that exhausted their retries.
    pub failed: u64,
    /// Deliveries sitting out a retry backoff.
    pub delayed: u64,
    /// Sum of all of the above.
    pub total: u64,
}

#[derive(Default)]
struct QueueCounters {
    waiting: AtomicU64,
    active: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    delayed: AtomicU64,
}

impl QueueCounters {
    fn snapshot(&self) -> QueueCounts {
        let waiting = self.waiting.load(Ordering::Relaxed);
        let active = self.active.load(Ordering::Relaxed);
        let completed = self.completed.load(Ordering::Relaxed);
        let failed = self.failed.load(Ordering::Relaxed);
        let delayed = self.delayed.load(Ordering::Relaxed);
        QueueCounts {
            waiting,
            active,
            completed,
            failed,
            delayed,
            total: waiting + active + completed + failed + delayed,
        }
    }
}

/// Producer handle: enqueues work and exposes queue controls.
pub struct ProcessingQueue {
    sender: mpsc::UnboundedSender<ProcessingJobData>,
    counters: Arc<QueueCounters>,
    paused: watch::Sender<bool>,
}

/// Consumer handle owned by the worker task.
pub struct QueueConsumer {
    receiver: mpsc::UnboundedReceiver<ProcessingJobData>,
    counters: Arc<QueueCounters>,
    paused: watch::Receiver<bool>,
}

impl ProcessingQueue {
    /// Creates a queue and the consumer end for its worker.
    pub fn new() -> (Self, QueueConsumer) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let (paused_tx, paused_rx) = watch::channel(false);
        let counters = Arc::new(QueueCounters::default());
        (
            Self {
                sender,
                counters: counters.clone(),
                paused: paused_tx,
            },
            QueueConsumer {
                receiver,
                counters,
                paused: paused_rx,
            },
        )
    }

    /// Enqueues a pipeline run.
    pub fn enqueue(&self, data: ProcessingJobData) -> Result<(), QueueError> {
        self.sender.send(data).map_err(|_| QueueError::Closed)?;
        self.counters.waiting.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(
            document_id = %data.document_id,
            job_id = %data.job_id,
            "Enqueued processing job"
        );
        Ok(())
    }

    /// Current queue statistics.
    pub fn counts(&self) -> QueueCounts {
        self.counters.snapshot()
    }

    /// Stops the worker from picking up new deliveries.
    pub fn pause(&self) {
        if self.paused.send(true).is_ok() {
            tracing::info!("Processing queue paused");
        }
    }

    /// Resumes delivery processing.
    pub fn resume(&self) {
        if self.paused.send(false).is_ok() {
            tracing::info!("Processing queue resumed");
        }
    }

    /// Whether the queue is currently paused.
    pub fn is_paused(&self) -> bool {
        *self.paused.borrow()
    }
}

impl QueueConsumer {
    async fn wait_until_resumed(&mut self) {
        while *self.paused.borrow() {
            if self.paused.changed().await.is_err() {
                return;
            }
        }
    }
}

/// Drains the queue until every producer handle is dropped.
///
/// Each delivery is attempted up to `policy.attempts` times. A delivery that
/// keeps failing is counted as failed and dropped; the job record has already
/// been marked failed by the processor at that point.
pub async fn run_queue_worker(
    mut consumer: QueueConsumer,
    processor: Arc<dyn JobProcessor>,
    policy: RetryPolicy,
) {
    tracing::info!(attempts = policy.attempts, "Queue worker started");

    while let Some(delivery) = consumer.receiver.recv().await {
        consumer.wait_until_resumed().await;
        consumer.counters.waiting.fetch_sub(1, Ordering::Relaxed);
        consumer.counters.active.fetch_add(1, Ordering::Relaxed);

        let attempts = policy.attempts.max(1);
        let mut attempt = 1;
        loop {
            let position = DeliveryAttempt {
                number: attempt,
                allowed: attempts,
            };
            match processor.process(delivery, position).await {
                Ok(()) => {
                    consumer.counters.completed.fetch_add(1, Ordering::Relaxed);
                    break;
                }
                Err(error) if attempt < attempts => {
                    let backoff = policy.backoff_after(attempt);
                    tracing::warn!(
                        job_id = %delivery.job_id,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %error,
                        "Delivery failed; retrying after backoff"
                    );
                    consumer.counters.delayed.fetch_add(1, Ordering::Relaxed);
                    tokio::time::sleep(backoff).await;
                    consumer.counters.delayed.fetch_sub(1, Ordering::Relaxed);
                    attempt += 1;
                }
                Err(error) => {
                    tracing::error!(
                        job_id = %delivery.job_id,
                        attempts,
                        error = %error,
                        "Delivery failed permanently"
                    );
                    consumer.counters.failed.fetch_add(1, Ordering::Relaxed);
                    break;
                }
            }
        }
        consumer.counters.active.fetch_sub(1, Ordering::Relaxed);
    }

    tracing::info!("Queue worker stopped");
}
