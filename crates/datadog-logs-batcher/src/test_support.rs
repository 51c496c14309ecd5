// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! In-memory submitter and callback recorders shared by unit tests.

#![allow(clippy::unwrap_used)]

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::callbacks::Callbacks;
use crate::delivery::LogSubmitter;
use crate::error::SubmitError;
use crate::transform::LogItem;

/// Records every submission and answers from a script, then from a fallback.
pub(crate) struct RecordingSubmitter {
    script: Mutex<VecDeque<Result<(), SubmitError>>>,
    fallback: Result<(), SubmitError>,
    calls: Mutex<Vec<Vec<LogItem>>>,
    delay: Option<Duration>,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl RecordingSubmitter {
    pub(crate) fn succeeding() -> Self {
        Self::scripted(Vec::new())
    }

    pub(crate) fn failing(error: SubmitError) -> Self {
        let mut submitter = Self::succeeding();
        submitter.fallback = Err(error);
        submitter
    }

    pub(crate) fn scripted(script: Vec<Result<(), SubmitError>>) -> Self {
        RecordingSubmitter {
            script: Mutex::new(script.into()),
            fallback: Ok(()),
            calls: Mutex::new(Vec::new()),
            delay: None,
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
        }
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub(crate) fn attempts(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub(crate) fn calls(&self) -> Vec<Vec<LogItem>> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn max_concurrency(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LogSubmitter for RecordingSubmitter {
    async fn submit(&self, items: &[LogItem]) -> Result<(), SubmitError> {
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);
        self.calls.lock().unwrap().push(items.to_vec());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let outcome = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        self.active.fetch_sub(1, Ordering::SeqCst);
        outcome
    }
}

/// Collects `on_error` invocations as `(message, items)`.
#[derive(Clone, Default)]
pub(crate) struct ErrorLog {
    entries: Arc<Mutex<Vec<(String, Vec<LogItem>)>>>,
}

impl ErrorLog {
    pub(crate) fn callbacks(&self) -> Callbacks {
        let entries = Arc::clone(&self.entries);
        Callbacks::new().with_on_error(move |error, items| {
            entries
                .lock()
                .unwrap()
                .push((error.to_string(), items.map(<[LogItem]>::to_vec).unwrap_or_default()));
        })
    }

    pub(crate) fn entries(&self) -> Vec<(String, Vec<LogItem>)> {
        self.entries.lock().unwrap().clone()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.lock().unwrap().is_empty()
    }
}
