// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Fire-and-forget submission of drained batches with bounded retry.
//!
//! ```text
//!   drained batch ──> spawn ──> ┌──────────────┐  Ok ──> debug trace
//!                               │ submit items │
//!                               └──────┬───────┘  Err(transient) ──> backoff, again
//!                                      │
//!                                      └─ rejected / retries exhausted ──> on_error(items)
//! ```
//!
//! Each submission runs in its own task, tracked by a `JoinSet` so the host
//! can wait for outstanding deliveries at shutdown. The ingestion path never
//! awaits a delivery. Deliveries are not cancelled when the pipeline is
//! dropped; they are detached and run to completion.

use async_trait::async_trait;
use std::mem;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tokio::time::Instant;
use tracing::{debug, error, warn};

use crate::accumulator::LogBatch;
use crate::callbacks::Callbacks;
use crate::error::{BatcherError, SubmitError};
use crate::retry::RetryStrategy;
use crate::transform::LogItem;

/// The remote side of delivery: one attempt to ship a batch of items.
#[async_trait]
pub trait LogSubmitter: Send + Sync {
    async fn submit(&self, items: &[LogItem]) -> Result<(), SubmitError>;
}

pub struct DeliveryPipeline {
    submitter: Arc<dyn LogSubmitter>,
    retry_strategy: RetryStrategy,
    callbacks: Callbacks,
    tasks: Mutex<JoinSet<()>>,
    pending: Arc<AtomicUsize>,
    permits: Option<Arc<Semaphore>>,
}

/// Counts one delivery task until it finishes or is dropped.
struct PendingGuard(Arc<AtomicUsize>);

impl PendingGuard {
    fn track(pending: &Arc<AtomicUsize>) -> Self {
        pending.fetch_add(1, Ordering::SeqCst);
        PendingGuard(Arc::clone(pending))
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl DeliveryPipeline {
    /// `max_concurrent` caps how many submissions talk to the intake at once.
    /// Batches over the cap wait for a permit inside their own task.
    #[must_use]
    pub fn new(
        submitter: Arc<dyn LogSubmitter>,
        retry_strategy: RetryStrategy,
        callbacks: Callbacks,
        max_concurrent: Option<usize>,
    ) -> Self {
        DeliveryPipeline {
            submitter,
            retry_strategy,
            callbacks,
            tasks: Mutex::new(JoinSet::new()),
            pending: Arc::new(AtomicUsize::new(0)),
            permits: max_concurrent.map(|permits| Arc::new(Semaphore::new(permits))),
        }
    }

    fn tasks(&self) -> MutexGuard<'_, JoinSet<()>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Hands `batch` to a background task and returns immediately.
    ///
    /// Empty batches are dropped. Must be called from within a tokio runtime.
    pub fn submit(&self, batch: LogBatch) {
        if batch.is_empty() {
            return;
        }

        let submitter = Arc::clone(&self.submitter);
        let retry_strategy = self.retry_strategy.clone();
        let callbacks = self.callbacks.clone();
        let permits = self.permits.clone();
        let pending = PendingGuard::track(&self.pending);

        let mut tasks = self.tasks();
        while let Some(result) = tasks.try_join_next() {
            log_join_error(result);
        }
        tasks.spawn(async move {
            let _pending = pending;
            // Held until the delivery finishes, retries included.
            let _permit = match permits {
                Some(permits) => permits.acquire_owned().await.ok(),
                None => None,
            };
            deliver(submitter.as_ref(), &retry_strategy, &callbacks, batch).await;
        });
    }

    /// Number of deliveries still running.
    ///
    /// Counts tasks a concurrent [`DeliveryPipeline::wait_for_deliveries`] is
    /// awaiting and tasks detached after a timed-out wait.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        let mut tasks = self.tasks();
        while let Some(result) = tasks.try_join_next() {
            log_join_error(result);
        }
        self.pending.load(Ordering::SeqCst)
    }

    /// Waits until every tracked delivery finished or `timeout` elapsed.
    ///
    /// Returns `false` on timeout; the deliveries still running are detached,
    /// not aborted.
    pub async fn wait_for_deliveries(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let mut pending = mem::take(&mut *self.tasks());
            if pending.is_empty() {
                return true;
            }

            let drained = tokio::time::timeout_at(deadline, async {
                while let Some(result) = pending.join_next().await {
                    log_join_error(result);
                }
            })
            .await;

            if drained.is_err() {
                warn!(
                    "LOGS | Gave up waiting for {} in-flight deliveries after {} ms",
                    pending.len(),
                    timeout.as_millis()
                );
                pending.detach_all();
                return false;
            }
        }
    }
}

impl Drop for DeliveryPipeline {
    fn drop(&mut self) {
        self.tasks().detach_all();
    }
}

impl std::fmt::Debug for DeliveryPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryPipeline")
            .field("retry_strategy", &self.retry_strategy)
            .field("callbacks", &self.callbacks)
            .field("max_concurrent", &self.permits.is_some())
            .finish_non_exhaustive()
    }
}

fn log_join_error(result: Result<(), JoinError>) {
    if let Err(e) = result {
        error!("LOGS | Delivery task failed: {}", e);
    }
}

/// Ships one batch, retrying per `retry_strategy`. Returns whether it was delivered.
///
/// Terminal failures go to `on_error` with every item of the batch.
pub(crate) async fn deliver(
    submitter: &dyn LogSubmitter,
    retry_strategy: &RetryStrategy,
    callbacks: &Callbacks,
    batch: LogBatch,
) -> bool {
    let count = batch.len();
    let max_attempts = retry_strategy.max_attempts();
    let mut attempt = 0;

    loop {
        attempt += 1;
        let started = Instant::now();
        callbacks.debug(&format!("Sending {count} logs to datadog"));

        match submitter.submit(batch.items()).await {
            Ok(()) => {
                debug!(
                    "LOGS | Delivered batch {} ({} logs, {} bytes) in {} ms after {} attempts",
                    batch.token(),
                    count,
                    batch.size_bytes(),
                    started.elapsed().as_millis(),
                    attempt
                );
                callbacks.debug(&format!("Sending {count} logs to datadog completed"));
                return true;
            }
            Err(e) if e.is_retryable() && attempt < max_attempts => {
                let delay = retry_strategy.delay(attempt);
                debug!(
                    "LOGS | Attempt {}/{} for batch {} failed, retrying in {} ms: {}",
                    attempt,
                    max_attempts,
                    batch.token(),
                    delay.as_millis(),
                    e
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                error!(
                    "LOGS | Failed to send batch {} of {} logs after {} attempts: {}",
                    batch.token(),
                    count,
                    attempt,
                    e
                );
                let error = BatcherError::Delivery {
                    attempts: attempt,
                    source: e,
                };
                callbacks.error(&error, Some(batch.items()));
                return false;
            }
        }
    }
}
