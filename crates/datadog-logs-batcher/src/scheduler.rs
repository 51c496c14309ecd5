// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Flush triggers.
//!
//! In batched mode every insert is followed by the size check, then the count
//! check. A periodic timer flushes whatever is open. In immediate mode each
//! item is its own batch and no timer runs.

use std::fmt;
use std::slice;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::accumulator::{BatchAccumulator, BatchTotals, LogBatch};
use crate::callbacks::Callbacks;
use crate::config::{BatcherConfig, FlushMode};
use crate::delivery::DeliveryPipeline;
use crate::error::BatcherError;
use crate::transform::LogItem;

/// What caused a batch to be flushed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushReason {
    Size,
    Count,
    Interval,
    Immediate,
    Shutdown,
}

impl fmt::Display for FlushReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            FlushReason::Size => "size",
            FlushReason::Count => "count",
            FlushReason::Interval => "interval",
            FlushReason::Immediate => "immediate",
            FlushReason::Shutdown => "shutdown",
        };
        f.write_str(reason)
    }
}

/// Ceilings a batch or an item is checked against. All are "exceeds", not "reaches".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchLimits {
    pub max_content_size_bytes: usize,
    pub max_batch_entries: usize,
    pub max_log_size_bytes: usize,
}

impl From<&BatcherConfig> for BatchLimits {
    fn from(config: &BatcherConfig) -> Self {
        BatchLimits {
            max_content_size_bytes: config.max_content_size_bytes,
            max_batch_entries: config.max_batch_entries,
            max_log_size_bytes: config.max_log_size_bytes,
        }
    }
}

#[derive(Debug)]
pub struct FlushScheduler {
    accumulator: Arc<BatchAccumulator>,
    delivery: Arc<DeliveryPipeline>,
    flush_mode: FlushMode,
    limits: BatchLimits,
    interval: Duration,
    callbacks: Callbacks,
    timer_started: AtomicBool,
    timer_cancel: CancellationToken,
}

impl FlushScheduler {
    #[must_use]
    pub fn new(
        config: &BatcherConfig,
        accumulator: Arc<BatchAccumulator>,
        delivery: Arc<DeliveryPipeline>,
        callbacks: Callbacks,
    ) -> Self {
        FlushScheduler {
            accumulator,
            delivery,
            flush_mode: config.flush_mode,
            limits: BatchLimits::from(config),
            interval: config.send_interval(),
            callbacks,
            timer_started: AtomicBool::new(false),
            timer_cancel: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn flush_mode(&self) -> FlushMode {
        self.flush_mode
    }

    /// Accepts one item and flushes if it tipped a ceiling.
    ///
    /// Oversized items are reported through `on_error` and still shipped.
    /// Returns the reason when this insert caused a flush, or
    /// [`BatcherError::Closed`] once [`FlushScheduler::close`] ran.
    pub fn insert(&self, item: LogItem) -> Result<Option<FlushReason>, BatcherError> {
        let item_size = item.serialized_size();
        let oversized = (item_size > self.limits.max_log_size_bytes).then(|| item.clone());

        let flushed = match self.flush_mode {
            FlushMode::Immediate => {
                let batch = LogBatch::single(item, item_size);
                self.accumulator
                    .while_open(|| self.flush(batch, FlushReason::Immediate))
                    .ok_or(BatcherError::Closed)?;
                Some(FlushReason::Immediate)
            }
            FlushMode::Batched => {
                if self.accumulator.try_add(item, item_size).is_err() {
                    return Err(BatcherError::Closed);
                }

                let max_size = self.limits.max_content_size_bytes;
                let max_count = self.limits.max_batch_entries;
                if self.flush_if(FlushReason::Size, |totals| totals.size_bytes > max_size) {
                    Some(FlushReason::Size)
                } else if self.flush_if(FlushReason::Count, |totals| totals.count > max_count) {
                    Some(FlushReason::Count)
                } else {
                    None
                }
            }
        };

        if let Some(item) = oversized {
            let error = BatcherError::OversizedItem {
                size: item_size,
                limit: self.limits.max_log_size_bytes,
            };
            warn!("LOGS | {}", error);
            self.callbacks.error(&error, Some(slice::from_ref(&item)));
        }
        Ok(flushed)
    }

    /// Periodic trigger. Flushes the open batch unless it is empty.
    pub fn tick(&self) -> bool {
        self.flush_open(FlushReason::Interval)
    }

    /// Drains and submits the open batch if it holds anything.
    pub fn flush_open(&self, reason: FlushReason) -> bool {
        self.flush_if(reason, |totals| totals.count > 0)
    }

    fn flush_if(
        &self,
        reason: FlushReason,
        should_flush: impl FnOnce(BatchTotals) -> bool,
    ) -> bool {
        match self.accumulator.drain_if(should_flush) {
            Some(batch) => {
                self.flush(batch, reason);
                true
            }
            None => false,
        }
    }

    fn flush(&self, batch: LogBatch, reason: FlushReason) {
        debug!(
            "LOGS | Flushing batch {} with {} logs ({} bytes), reason: {}",
            batch.token(),
            batch.len(),
            batch.size_bytes(),
            reason
        );
        self.delivery.submit(batch);
    }

    /// Spawns the periodic flush task. Does nothing in immediate mode, after
    /// the timer was stopped, or when it already runs.
    ///
    /// Returns whether a timer was started.
    pub fn start_timer(self: &Arc<Self>) -> bool {
        if self.flush_mode == FlushMode::Immediate || self.timer_cancel.is_cancelled() {
            return false;
        }
        if self.timer_started.swap(true, Ordering::SeqCst) {
            return false;
        }

        let scheduler = Arc::downgrade(self);
        let cancel = self.timer_cancel.clone();
        let period = self.interval;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            interval.tick().await;

            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => {
                        debug!("LOGS | Flush timer stopped");
                        break;
                    }
                    _ = interval.tick() => {
                        // Owner dropped without shutting down
                        let Some(scheduler) = scheduler.upgrade() else {
                            break;
                        };
                        scheduler.tick();
                    }
                }
            }
        });
        debug!("LOGS | Flush timer started, every {} ms", period.as_millis());
        true
    }

    /// Stops the timer, refuses further inserts and submits whatever is open.
    ///
    /// Returns whether a final batch was submitted.
    pub fn close(&self) -> bool {
        self.stop_timer();
        let batch = self.accumulator.close();
        if batch.is_empty() {
            return false;
        }
        self.flush(batch, FlushReason::Shutdown);
        true
    }

    /// Stops the periodic flush for good. Returns `false` if it was already stopped.
    pub fn stop_timer(&self) -> bool {
        if self.timer_cancel.is_cancelled() {
            return false;
        }
        self.timer_cancel.cancel();
        true
    }

    #[must_use]
    pub fn timer_stopped(&self) -> bool {
        self.timer_cancel.is_cancelled()
    }
}
