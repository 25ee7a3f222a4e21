//! Fire-and-forget delivery of audit records.
//!
//! Callers hand records to [`AuditForwarder::forward`], which never blocks
//! and never fails. A background task drains the queue into the configured
//! [`AuditSink`], retrying each record a bounded number of times.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::domain::{AuditRecord, AuditSink};

/// Retry policy for a single record.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Attempts per record, including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt; later attempts wait proportionally
    /// longer.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(200),
        }
    }
}

/// Handle to the background audit queue. Cheap to clone.
#[derive(Debug, Clone)]
pub struct AuditForwarder {
    sender: mpsc::Sender<AuditRecord>,
    dropped: Arc<AtomicU64>,
}

impl AuditForwarder {
    /// Spawns the drain task and returns the handle plus the task's
    /// [`JoinHandle`]. The task ends once every handle is dropped and the
    /// queue is empty.
    #[must_use]
    pub fn spawn(
        sink: Arc<dyn AuditSink>,
        capacity: usize,
        policy: RetryPolicy,
    ) -> (Self, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let task = tokio::spawn(drain(sink, receiver, policy));
        let forwarder = Self {
            sender,
            dropped: Arc::new(AtomicU64::new(0)),
        };
        (forwarder, task)
    }

    /// Records dropped since startup because the queue was full or closed.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Records waiting for the drain task.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }

    /// Queues `record`. Drops it with a warning when the queue is full or
    /// the drain task is gone.
    pub fn forward(&self, record: AuditRecord) {
        if let Err(err) = self.sender.try_send(record) {
            let (reason, record) = match err {
                mpsc::error::TrySendError::Full(r) => ("queue full", r),
                mpsc::error::TrySendError::Closed(r) => ("forwarder stopped", r),
            };
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            tracing::warn!(
                action = %record.action,
                actor = %record.actor_user_id,
                reason,
                dropped,
                "audit record dropped"
            );
        }
    }
}

async fn drain(
    sink: Arc<dyn AuditSink>,
    mut receiver: mpsc::Receiver<AuditRecord>,
    policy: RetryPolicy,
) {
    while let Some(record) = receiver.recv().await {
        submit_with_retry(sink.as_ref(), &record, policy).await;
    }
    tracing::debug!("audit forwarder drained");
}

async fn submit_with_retry(sink: &dyn AuditSink, record: &AuditRecord, policy: RetryPolicy) {
    let attempts = policy.max_attempts.max(1);
    for attempt in 1..=attempts {
        match sink.submit(record).await {
            Ok(()) => return,
            Err(err) if attempt < attempts => {
                tracing::warn!(
                    action = %record.action,
                    attempt,
                    error = %err,
                    "audit submit failed, retrying"
                );
                tokio::time::sleep(policy.backoff.saturating_mul(attempt)).await;
            }
            Err(err) => {
                tracing::error!(
                    action = %record.action,
                    actor = %record.actor_user_id,
                    attempts,
                    error = %err,
                    "audit record lost"
                );
            }
        }
    }
}
