// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Host-supplied hooks for errors, debug traces and readiness.

use std::fmt::Debug;
use std::sync::Arc;

use crate::error::BatcherError;
use crate::transform::LogItem;

/// Receives oversize warnings and terminal delivery failures, together with
/// the affected items so the host can persist or re-emit them.
pub type ErrorCallback = Arc<dyn Fn(&BatcherError, Option<&[LogItem]>) + Send + Sync>;

pub type DebugCallback = Arc<dyn Fn(&str) + Send + Sync>;

pub type InitCallback = Arc<dyn Fn() + Send + Sync>;

/// All callbacks are optional. Without `on_error`, failed batches are dropped
/// after being logged.
#[derive(Clone, Default)]
pub struct Callbacks {
    on_error: Option<ErrorCallback>,
    on_debug: Option<DebugCallback>,
    on_init: Option<InitCallback>,
}

impl Callbacks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_on_error(
        mut self,
        on_error: impl Fn(&BatcherError, Option<&[LogItem]>) + Send + Sync + 'static,
    ) -> Self {
        self.on_error = Some(Arc::new(on_error));
        self
    }

    #[must_use]
    pub fn with_on_debug(mut self, on_debug: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_debug = Some(Arc::new(on_debug));
        self
    }

    #[must_use]
    pub fn with_on_init(mut self, on_init: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_init = Some(Arc::new(on_init));
        self
    }

    pub(crate) fn error(&self, error: &BatcherError, items: Option<&[LogItem]>) {
        if let Some(on_error) = &self.on_error {
            on_error(error, items);
        }
    }

    pub(crate) fn debug(&self, message: &str) {
        if let Some(on_debug) = &self.on_debug {
            on_debug(message);
        }
    }

    pub(crate) fn init(&self) {
        if let Some(on_init) = &self.on_init {
            on_init();
        }
    }
}

impl Debug for Callbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Callbacks")
            .field("on_error", &self.on_error.is_some())
            .field("on_debug", &self.on_debug.is_some())
            .field("on_init", &self.on_init.is_some())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_missing_callbacks_are_noops() {
        let callbacks = Callbacks::new();
        callbacks.error(&BatcherError::InvalidConfig("x".into()), None);
        callbacks.debug("nothing listens");
        callbacks.init();
    }

    #[test]
    fn test_callbacks_receive_arguments() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let errors = Arc::clone(&seen);
        let debugs = Arc::clone(&seen);
        let inits = Arc::clone(&seen);

        let callbacks = Callbacks::new()
            .with_on_error(move |error, items| {
                errors
                    .lock()
                    .unwrap()
                    .push(format!("{error} ({})", items.map_or(0, <[LogItem]>::len)));
            })
            .with_on_debug(move |message| debugs.lock().unwrap().push(message.to_string()))
            .with_on_init(move || inits.lock().unwrap().push("init".to_string()));

        callbacks.init();
        callbacks.debug("Sending 2 logs to datadog");
        callbacks.error(
            &BatcherError::OversizedItem { size: 9, limit: 8 },
            Some(&[LogItem::new("big")]),
        );

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                "init".to_string(),
                "Sending 2 logs to datadog".to_string(),
                "Log entry exceeds size limit of 8 bytes: 9 (1)".to_string(),
            ]
        );
    }

    #[test]
    fn test_debug_format_reports_presence() {
        let callbacks = Callbacks::new().with_on_debug(|_| {});
        let formatted = format!("{callbacks:?}");
        assert!(formatted.contains("on_debug: true"));
        assert!(formatted.contains("on_error: false"));
    }
}
