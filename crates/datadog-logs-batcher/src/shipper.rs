// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Host-owned lifecycle object tying the pipeline together.
//!
//! ```text
//!   LogShipper::new ──> start ──> ingest / consume ... ──> shutdown ──> wait_for_deliveries
//!                         │                                   │
//!                    timer + on_init                 stop timer + final flush
//! ```
//!
//! Every instance owns its own accumulator, timer and shutdown state, so
//! several shippers can coexist in one process.

use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::accumulator::BatchAccumulator;
use crate::callbacks::Callbacks;
use crate::config::BatcherConfig;
use crate::delivery::{DeliveryPipeline, LogSubmitter};
use crate::error::BatcherError;
use crate::intake::LogsIntakeClient;
use crate::scheduler::{FlushReason, FlushScheduler};
use crate::shutdown::ShutdownDrain;
use crate::transform::RecordTransform;

/// Outcome of handing one record to [`LogShipper::ingest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ingested {
    /// Queued for delivery. Carries the reason when the record caused a flush.
    Accepted(Option<FlushReason>),
    /// `null` or empty record, nothing to ship.
    Skipped,
    /// The shipper already shut down.
    Closed,
}

#[derive(Debug)]
pub struct LogShipper {
    transform: RecordTransform,
    scheduler: Arc<FlushScheduler>,
    delivery: Arc<DeliveryPipeline>,
    drain: Arc<ShutdownDrain>,
    callbacks: Callbacks,
    started: AtomicBool,
}

impl LogShipper {
    /// Wires a pipeline in front of `submitter`. Nothing runs until [`LogShipper::start`].
    pub fn new(
        config: &BatcherConfig,
        submitter: Arc<dyn LogSubmitter>,
        callbacks: Callbacks,
    ) -> Result<Self, BatcherError> {
        config.validate()?;

        let delivery = Arc::new(DeliveryPipeline::new(
            submitter,
            config.retry_strategy(),
            callbacks.clone(),
            config.max_concurrent_deliveries,
        ));
        let scheduler = Arc::new(FlushScheduler::new(
            config,
            Arc::new(BatchAccumulator::new()),
            Arc::clone(&delivery),
            callbacks.clone(),
        ));
        let drain = Arc::new(ShutdownDrain::new(
            Arc::clone(&scheduler),
            callbacks.clone(),
        ));

        Ok(LogShipper {
            transform: RecordTransform::new(config.metadata.clone()),
            scheduler,
            delivery,
            drain,
            callbacks,
            started: AtomicBool::new(false),
        })
    }

    /// Shipper posting to the Datadog logs intake described by `config`.
    pub fn with_intake(config: &BatcherConfig, callbacks: Callbacks) -> Result<Self, BatcherError> {
        let client = LogsIntakeClient::new(config)?;
        Self::new(config, Arc::new(client), callbacks)
    }

    /// Starts the flush timer and fires `on_init`. Idempotent.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) -> bool {
        if self.started.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.scheduler.start_timer();
        debug!(
            "LOGS | Log shipper started in {:?} mode",
            self.scheduler.flush_mode()
        );
        self.callbacks.init();
        true
    }

    /// Transforms and queues one record.
    ///
    /// A record is either part of the final drain or refused with
    /// [`Ingested::Closed`], even when shutdown runs on another thread.
    pub fn ingest(&self, record: Value) -> Ingested {
        let Some(item) = self.transform.transform(record) else {
            return Ingested::Skipped;
        };
        match self.scheduler.insert(item) {
            Ok(flushed) => Ingested::Accepted(flushed),
            Err(_) => {
                warn!("LOGS | Record received after shutdown, dropping it");
                Ingested::Closed
            }
        }
    }

    /// Ingests records until a `null` record arrives or the channel closes.
    ///
    /// Ending the stream does not flush; that is left to the timer and
    /// [`LogShipper::shutdown`]. Returns the number of accepted records.
    pub async fn consume(&self, rx: mpsc::Receiver<Value>) -> usize {
        self.consume_until(rx, CancellationToken::new()).await
    }

    /// Like [`LogShipper::consume`], but `stop` closes the channel.
    ///
    /// Records already buffered in the channel are still ingested before this
    /// returns, so the caller can run [`LogShipper::shutdown`] right after.
    pub async fn consume_until(
        &self,
        mut rx: mpsc::Receiver<Value>,
        stop: CancellationToken,
    ) -> usize {
        let mut accepted = 0;
        let mut stopping = false;
        loop {
            let record = if stopping {
                rx.recv().await
            } else {
                tokio::select! {
                    biased;
                    record = rx.recv() => record,
                    () = stop.cancelled() => {
                        debug!("LOGS | Stop requested, reading buffered logs");
                        rx.close();
                        stopping = true;
                        continue;
                    }
                }
            };
            let Some(record) = record else {
                break;
            };
            if record.is_null() {
                debug!("LOGS | End of log stream");
                break;
            }
            match self.ingest(record) {
                Ingested::Accepted(_) => accepted += 1,
                Ingested::Skipped => {}
                Ingested::Closed => break,
            }
        }
        accepted
    }

    /// Runs the final drain. Returns `false` if it already ran.
    pub fn shutdown(&self) -> bool {
        self.drain.trigger()
    }

    /// Handle for [`ShutdownDrain::listen_for_signals`].
    #[must_use]
    pub fn shutdown_drain(&self) -> Arc<ShutdownDrain> {
        Arc::clone(&self.drain)
    }

    /// See [`DeliveryPipeline::wait_for_deliveries`].
    pub async fn wait_for_deliveries(&self, timeout: Duration) -> bool {
        self.delivery.wait_for_deliveries(timeout).await
    }

    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.delivery.in_flight()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::FlushMode;
    use crate::error::SubmitError;
    use crate::test_support::{ErrorLog, RecordingSubmitter};
    use crate::transform::{LogItem, StaticMetadata};
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Barrier;
    use std::thread;

    fn config() -> BatcherConfig {
        BatcherConfig {
            retries: 0,
            send_interval_ms: 3_600_000,
            metadata: StaticMetadata {
                ddsource: Some("nodejs".to_string()),
                ddtags: None,
                service: Some("checkout".to_string()),
            },
            ..BatcherConfig::default()
        }
    }

    fn shipper_with(
        config: &BatcherConfig,
        submitter: &Arc<RecordingSubmitter>,
        callbacks: Callbacks,
    ) -> LogShipper {
        LogShipper::new(config, submitter.clone(), callbacks).unwrap()
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let config = BatcherConfig {
            max_batch_entries: 0,
            ..config()
        };
        let result = LogShipper::new(
            &config,
            Arc::new(RecordingSubmitter::succeeding()),
            Callbacks::new(),
        );
        assert!(matches!(result, Err(BatcherError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_start_fires_on_init_once() {
        let inits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&inits);
        let callbacks = Callbacks::new().with_on_init(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let submitter = Arc::new(RecordingSubmitter::succeeding());
        let shipper = shipper_with(&config(), &submitter, callbacks);

        assert!(shipper.start());
        assert!(!shipper.start());
        assert_eq!(inits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_ingest_then_shutdown_ships_transformed_records() {
        let submitter = Arc::new(RecordingSubmitter::succeeding());
        let shipper = shipper_with(&config(), &submitter, Callbacks::new());
        shipper.start();

        assert_eq!(
            shipper.ingest(json!({"level": 50, "msg": "boom", "hostname": "web-1"})),
            Ingested::Accepted(None)
        );
        assert_eq!(shipper.ingest(Value::Null), Ingested::Skipped);
        assert_eq!(shipper.ingest(json!("")), Ingested::Skipped);

        assert!(shipper.shutdown());
        assert!(!shipper.shutdown());
        assert!(shipper.wait_for_deliveries(Duration::from_secs(5)).await);

        let calls = submitter.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(
            calls[0],
            vec![LogItem {
                message: r#"{"level":"error","msg":"boom","hostname":"web-1"}"#.to_string(),
                ddsource: Some("nodejs".to_string()),
                ddtags: None,
                service: Some("checkout".to_string()),
                hostname: Some("web-1".to_string()),
            }]
        );
    }

    #[tokio::test]
    async fn test_ingest_after_shutdown_is_closed() {
        let submitter = Arc::new(RecordingSubmitter::succeeding());
        let shipper = shipper_with(&config(), &submitter, Callbacks::new());
        shipper.start();
        shipper.shutdown();

        assert_eq!(shipper.ingest(json!({"msg": "late"})), Ingested::Closed);
        assert!(shipper.wait_for_deliveries(Duration::from_secs(5)).await);
        assert_eq!(submitter.attempts(), 0);
    }

    #[tokio::test]
    async fn test_consume_stops_on_null_without_flushing() {
        let submitter = Arc::new(RecordingSubmitter::succeeding());
        let shipper = shipper_with(&config(), &submitter, Callbacks::new());
        shipper.start();

        let (tx, rx) = mpsc::channel(16);
        tx.send(json!({"msg": "one"})).await.unwrap();
        tx.send(json!("")).await.unwrap();
        tx.send(json!({"msg": "two"})).await.unwrap();
        tx.send(Value::Null).await.unwrap();
        tx.send(json!({"msg": "after end"})).await.unwrap();

        assert_eq!(shipper.consume(rx).await, 2);
        assert!(shipper.wait_for_deliveries(Duration::from_secs(5)).await);
        assert_eq!(submitter.attempts(), 0);

        shipper.shutdown();
        assert!(shipper.wait_for_deliveries(Duration::from_secs(5)).await);
        assert_eq!(submitter.calls()[0].len(), 2);
    }

    #[tokio::test]
    async fn test_consume_stops_when_channel_closes() {
        let submitter = Arc::new(RecordingSubmitter::succeeding());
        let shipper = shipper_with(&config(), &submitter, Callbacks::new());

        let (tx, rx) = mpsc::channel(16);
        tx.send(json!({"msg": "only"})).await.unwrap();
        drop(tx);

        assert_eq!(shipper.consume(rx).await, 1);
    }

    #[tokio::test]
    async fn test_immediate_mode_ships_each_record() {
        let config = BatcherConfig {
            flush_mode: FlushMode::Immediate,
            ..config()
        };
        let submitter = Arc::new(RecordingSubmitter::succeeding());
        let shipper = shipper_with(&config, &submitter, Callbacks::new());
        shipper.start();

        for n in 0..4 {
            assert_eq!(
                shipper.ingest(json!({ "n": n })),
                Ingested::Accepted(Some(FlushReason::Immediate))
            );
        }

        assert!(shipper.wait_for_deliveries(Duration::from_secs(5)).await);
        assert_eq!(submitter.attempts(), 4);
    }

    #[tokio::test]
    async fn test_failed_delivery_reports_items() {
        let errors = ErrorLog::default();
        let submitter = Arc::new(RecordingSubmitter::failing(SubmitError::Rejected {
            status: 400,
            message: "bad request".to_string(),
        }));
        let shipper = shipper_with(&config(), &submitter, errors.callbacks());

        shipper.ingest(json!({"msg": "lost"}));
        shipper.shutdown();
        assert!(shipper.wait_for_deliveries(Duration::from_secs(5)).await);

        let reported = errors.entries();
        assert_eq!(reported.len(), 1);
        assert!(reported[0].0.starts_with("Failed to deliver logs after 1 attempts"));
        assert_eq!(reported[0].1.len(), 1);
    }

    #[tokio::test]
    async fn test_instances_are_independent() {
        let first_submitter = Arc::new(RecordingSubmitter::succeeding());
        let second_submitter = Arc::new(RecordingSubmitter::succeeding());
        let first = shipper_with(&config(), &first_submitter, Callbacks::new());
        let second = shipper_with(&config(), &second_submitter, Callbacks::new());
        first.start();
        second.start();

        first.ingest(json!({"msg": "first"}));
        second.ingest(json!({"msg": "second"}));
        first.shutdown();

        assert_eq!(second.ingest(json!({"msg": "still open"})), Ingested::Accepted(None));
        assert!(first.wait_for_deliveries(Duration::from_secs(5)).await);
        assert_eq!(first_submitter.attempts(), 1);
        assert_eq!(second_submitter.attempts(), 0);
    }

    #[tokio::test]
    async fn test_stop_ingests_buffered_records_then_closes_channel() {
        let submitter = Arc::new(RecordingSubmitter::succeeding());
        let shipper = shipper_with(&config(), &submitter, Callbacks::new());
        shipper.start();

        let (tx, rx) = mpsc::channel(16);
        for n in 0..5 {
            tx.send(json!({ "n": n })).await.unwrap();
        }
        let stop = CancellationToken::new();
        stop.cancel();

        assert_eq!(shipper.consume_until(rx, stop).await, 5);
        assert!(tx.send(json!({"n": 5})).await.is_err());

        shipper.shutdown();
        assert!(shipper.wait_for_deliveries(Duration::from_secs(5)).await);
        let expected: Vec<LogItem> = (0..5)
            .map(|n| LogItem {
                message: format!(r#"{{"n":{n},"level":"debug"}}"#),
                ddsource: Some("nodejs".to_string()),
                ddtags: None,
                service: Some("checkout".to_string()),
                hostname: None,
            })
            .collect();
        assert_eq!(submitter.calls(), vec![expected]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_ingest_racing_shutdown_never_loses_accepted_record() {
        let handle = tokio::runtime::Handle::current();
        let immediate = BatcherConfig {
            flush_mode: FlushMode::Immediate,
            ..config()
        };

        for n in 0..500 {
            let config = if n % 2 == 0 { config() } else { immediate.clone() };
            let submitter = Arc::new(RecordingSubmitter::succeeding());
            let shipper = shipper_with(&config, &submitter, Callbacks::new());
            let barrier = Barrier::new(2);

            let outcome = thread::scope(|s| {
                let ingester = s.spawn(|| {
                    let _runtime = handle.enter();
                    barrier.wait();
                    shipper.ingest(json!({ "n": n }))
                });
                s.spawn(|| {
                    let _runtime = handle.enter();
                    barrier.wait();
                    shipper.shutdown();
                });
                ingester.join().unwrap()
            });

            assert!(shipper.wait_for_deliveries(Duration::from_secs(5)).await);
            let expected = match outcome {
                Ingested::Accepted(_) => 1,
                Ingested::Closed => 0,
                Ingested::Skipped => unreachable!("object records are never skipped"),
            };
            assert_eq!(submitter.attempts(), expected, "iteration {n}: {outcome:?}");
        }
    }
}
