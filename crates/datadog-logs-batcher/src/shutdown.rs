// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! One-shot final flush when the host shuts down.
//!
//! The drain stops the flush timer, closes the accumulator to further records
//! and hands the open batch to delivery. It does not wait for that delivery; hosts that need it use
//! [`crate::delivery::DeliveryPipeline::wait_for_deliveries`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::callbacks::Callbacks;
use crate::scheduler::FlushScheduler;

const SHUTDOWN_MESSAGE: &str = "Shutdown detected. Attempting to send remaining logs to Datadog";

#[derive(Debug)]
pub struct ShutdownDrain {
    scheduler: Arc<FlushScheduler>,
    callbacks: Callbacks,
    triggered: AtomicBool,
    done: CancellationToken,
}

impl ShutdownDrain {
    #[must_use]
    pub fn new(scheduler: Arc<FlushScheduler>, callbacks: Callbacks) -> Self {
        ShutdownDrain {
            scheduler,
            callbacks,
            triggered: AtomicBool::new(false),
            done: CancellationToken::new(),
        }
    }

    /// Runs the final flush. Only the first call does anything.
    ///
    /// Returns `true` for the call that ran the drain.
    pub fn trigger(&self) -> bool {
        if self.triggered.swap(true, Ordering::SeqCst) {
            return false;
        }

        self.callbacks.debug(SHUTDOWN_MESSAGE);
        let flushed = self.scheduler.close();
        debug!("LOGS | Shutdown drain complete, submitted remaining logs: {}", flushed);
        self.done.cancel();
        true
    }

    #[must_use]
    pub fn has_triggered(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    /// Waits for Ctrl-C or SIGTERM and runs the drain.
    ///
    /// Returns early with `false` when the drain was triggered some other way.
    pub async fn listen_for_signals(&self) -> bool {
        tokio::select! {
            () = self.done.cancelled() => false,
            () = shutdown_signal() => self.trigger(),
        }
    }
}

/// Resolves on the first Ctrl-C or SIGTERM.
///
/// Hosts that must finish reading buffered input before the drain runs wait
/// on this and call [`ShutdownDrain::trigger`] themselves.
pub async fn shutdown_signal() {
    tokio::select! {
        () = interrupt() => info!("LOGS | Received Ctrl+C, flushing remaining logs"),
        () = terminate() => info!("LOGS | Received SIGTERM, flushing remaining logs"),
    }
}

async fn interrupt() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("LOGS | Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
}

#[cfg(unix)]
async fn terminate() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            error!("LOGS | Failed to listen for SIGTERM: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await;
}
