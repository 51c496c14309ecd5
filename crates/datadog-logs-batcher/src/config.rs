// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use serde::Deserialize;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::constants;
use crate::error::BatcherError;
use crate::retry::RetryStrategy;
use crate::transform::StaticMetadata;

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// When records leave the process.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlushMode {
    /// Accumulate and flush on size, count or interval.
    #[default]
    Batched,
    /// Ship every record on its own, without a timer.
    Immediate,
}

impl FromStr for FlushMode {
    type Err = BatcherError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "batched" => Ok(FlushMode::Batched),
            "immediate" => Ok(FlushMode::Immediate),
            other => Err(BatcherError::InvalidConfig(format!(
                "Invalid flush mode '{other}'. Must be one of: batched, immediate"
            ))),
        }
    }
}

/// Everything the batcher and the HTTP intake client need.
#[derive(Debug, Clone)]
pub struct BatcherConfig {
    /// Datadog API key. Required by the HTTP intake client only.
    pub api_key: Option<String>,
    /// Datadog site (e.g., datadoghq.com, datadoghq.eu)
    pub site: String,
    /// Overrides the intake URL prefix, mainly for tests and proxies.
    pub logs_dd_url: Option<String>,
    pub https_proxy: Option<String>,
    /// Per-request timeout, in seconds.
    pub flush_timeout: u64,
    pub use_compression: bool,
    /// gzip level, 0 to 9.
    pub compression_level: u32,
    pub metadata: StaticMetadata,
    /// Retries after the first failed attempt.
    pub retries: usize,
    pub send_interval_ms: u64,
    pub flush_mode: FlushMode,
    pub max_content_size_bytes: usize,
    pub max_batch_entries: usize,
    pub max_log_size_bytes: usize,
    /// Caps in-flight submissions. `None` is unbounded.
    pub max_concurrent_deliveries: Option<usize>,
    /// Log level (e.g., trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for BatcherConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            site: constants::DEFAULT_SITE.to_string(),
            logs_dd_url: None,
            https_proxy: None,
            flush_timeout: constants::DEFAULT_FLUSH_TIMEOUT_SECS,
            use_compression: true,
            compression_level: constants::DEFAULT_COMPRESSION_LEVEL,
            metadata: StaticMetadata::default(),
            retries: constants::DEFAULT_RETRIES,
            send_interval_ms: constants::DEFAULT_SEND_INTERVAL_MS,
            flush_mode: FlushMode::Batched,
            max_content_size_bytes: constants::MAX_CONTENT_SIZE_BYTES,
            max_batch_entries: constants::MAX_BATCH_ENTRIES,
            max_log_size_bytes: constants::MAX_LOG_SIZE_BYTES,
            max_concurrent_deliveries: None,
            log_level: "info".to_string(),
        }
    }
}

impl BatcherConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self, BatcherError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from any `DD_*` key lookup. Unset or
    /// unparsable numeric values fall back to their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, BatcherError> {
        let defaults = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|val| !val.trim().is_empty());
        let parsed = |key: &str| non_empty(key).and_then(|val| val.trim().parse::<u64>().ok());
        let parsed_usize =
            |key: &str| non_empty(key).and_then(|val| val.trim().parse::<usize>().ok());

        let flush_mode = match non_empty("DD_LOGS_FLUSH_MODE") {
            Some(mode) => mode.parse()?,
            None if non_empty("DD_LOGS_SEND_IMMEDIATE")
                .is_some_and(|val| val.to_lowercase() == "true") =>
            {
                FlushMode::Immediate
            }
            None => FlushMode::Batched,
        };

        let config = Self {
            api_key: non_empty("DD_API_KEY"),
            site: lookup("DD_SITE").unwrap_or(defaults.site),
            logs_dd_url: non_empty("DD_LOGS_DD_URL"),
            https_proxy: non_empty("DD_PROXY_HTTPS").or_else(|| non_empty("HTTPS_PROXY")),
            flush_timeout: parsed("DD_FLUSH_TIMEOUT").unwrap_or(defaults.flush_timeout),
            use_compression: lookup("DD_LOGS_USE_COMPRESSION")
                .map_or(defaults.use_compression, |val| val.to_lowercase() != "false"),
            compression_level: non_empty("DD_LOGS_COMPRESSION_LEVEL")
                .and_then(|val| val.trim().parse::<u32>().ok())
                .unwrap_or(defaults.compression_level),
            metadata: StaticMetadata {
                ddsource: non_empty("DD_SOURCE"),
                ddtags: non_empty("DD_TAGS"),
                service: non_empty("DD_SERVICE"),
            },
            retries: parsed_usize("DD_LOGS_RETRIES").unwrap_or(defaults.retries),
            send_interval_ms: parsed("DD_LOGS_SEND_INTERVAL_MS")
                .unwrap_or(defaults.send_interval_ms),
            flush_mode,
            max_content_size_bytes: parsed_usize("DD_LOGS_MAX_CONTENT_SIZE_BYTES")
                .unwrap_or(defaults.max_content_size_bytes),
            max_batch_entries: parsed_usize("DD_LOGS_MAX_BATCH_ENTRIES")
                .unwrap_or(defaults.max_batch_entries),
            max_log_size_bytes: parsed_usize("DD_LOGS_MAX_LOG_SIZE_BYTES")
                .unwrap_or(defaults.max_log_size_bytes),
            max_concurrent_deliveries: parsed_usize("DD_LOGS_MAX_CONCURRENT_DELIVERIES"),
            log_level: lookup("DD_LOG_LEVEL")
                .map(|val| val.to_lowercase())
                .unwrap_or(defaults.log_level),
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), BatcherError> {
        if self.site.trim().is_empty() {
            return Err(BatcherError::InvalidConfig(
                "DD_SITE cannot be empty".to_string(),
            ));
        }

        if self.send_interval_ms == 0 {
            return Err(BatcherError::InvalidConfig(
                "Send interval must be greater than 0".to_string(),
            ));
        }

        if self.max_content_size_bytes == 0
            || self.max_batch_entries == 0
            || self.max_log_size_bytes == 0
        {
            return Err(BatcherError::InvalidConfig(
                "Batch ceilings must be greater than 0".to_string(),
            ));
        }

        if self.max_concurrent_deliveries == Some(0) {
            return Err(BatcherError::InvalidConfig(
                "Concurrent delivery cap must be greater than 0".to_string(),
            ));
        }

        if self.compression_level > 9 {
            return Err(BatcherError::InvalidConfig(format!(
                "Invalid compression level {}. Must be between 0 and 9",
                self.compression_level
            )));
        }

        if !VALID_LOG_LEVELS.contains(&self.log_level.as_str()) {
            return Err(BatcherError::InvalidConfig(format!(
                "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
                self.log_level
            )));
        }

        Ok(())
    }

    #[must_use]
    pub fn retry_strategy(&self) -> RetryStrategy {
        RetryStrategy::exponential(self.retries)
    }

    #[must_use]
    pub fn send_interval(&self) -> Duration {
        Duration::from_millis(self.send_interval_ms)
    }

    /// Full URL of the logs intake endpoint.
    #[must_use]
    pub fn intake_url(&self) -> String {
        match &self.logs_dd_url {
            Some(prefix) => format!("{}/api/v2/logs", prefix.trim_end_matches('/')),
            None => format!("https://http-intake.logs.{}/api/v2/logs", self.site.trim()),
        }
    }
}
