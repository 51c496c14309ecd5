// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! HTTP client for the Datadog logs intake.

use async_trait::async_trait;
use flate2::write::GzEncoder;
use flate2::Compression;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_ENCODING, CONTENT_TYPE};
use reqwest::StatusCode;
use std::io::Write;
use std::time::Duration;
use tracing::{debug, error};

use crate::config::BatcherConfig;
use crate::delivery::LogSubmitter;
use crate::error::{BatcherError, SubmitError};
use crate::transform::LogItem;

/// Posts batches as a JSON array to `/api/v2/logs`, gzip encoded unless
/// compression is disabled.
#[derive(Debug, Clone)]
pub struct LogsIntakeClient {
    client: reqwest::Client,
    url: String,
    headers: HeaderMap,
    compression: Option<Compression>,
}

impl LogsIntakeClient {
    pub fn new(config: &BatcherConfig) -> Result<Self, BatcherError> {
        let api_key = config
            .api_key
            .as_deref()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| BatcherError::InvalidConfig("DD_API_KEY is required".to_string()))?;

        let mut headers = HeaderMap::new();
        headers.insert(
            "DD-API-KEY",
            HeaderValue::from_str(api_key.trim()).map_err(|_| {
                BatcherError::InvalidConfig("DD_API_KEY is not a valid header value".to_string())
            })?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if config.use_compression {
            headers.insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));
        }

        let mut builder =
            reqwest::Client::builder().timeout(Duration::from_secs(config.flush_timeout));
        if let Some(https_uri) = &config.https_proxy {
            let proxy = reqwest::Proxy::https(https_uri.as_str())
                .map_err(|e| BatcherError::Client(e.to_string()))?;
            builder = builder.proxy(proxy);
        }
        let client = builder
            .build()
            .map_err(|e| BatcherError::Client(e.to_string()))?;

        let url = config.intake_url();
        debug!("LOGS | Shipping logs to {}", url);

        Ok(LogsIntakeClient {
            client,
            url,
            headers,
            compression: config
                .use_compression
                .then(|| Compression::new(config.compression_level)),
        })
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Request body for `items`.
    pub fn encode(&self, items: &[LogItem]) -> Result<Vec<u8>, SubmitError> {
        let json = serde_json::to_vec(items).map_err(|e| SubmitError::Encoding(e.to_string()))?;
        let Some(level) = self.compression else {
            return Ok(json);
        };

        let mut encoder = GzEncoder::new(Vec::with_capacity(json.len() / 4), level);
        encoder
            .write_all(&json)
            .map_err(|e| SubmitError::Encoding(e.to_string()))?;
        encoder
            .finish()
            .map_err(|e| SubmitError::Encoding(e.to_string()))
    }
}

#[async_trait]
impl LogSubmitter for LogsIntakeClient {
    async fn submit(&self, items: &[LogItem]) -> Result<(), SubmitError> {
        let body = self.encode(items)?;
        let response = self
            .client
            .post(&self.url)
            .headers(self.headers.clone())
            .body(body)
            .send()
            .await
            .map_err(|e| SubmitError::Transient(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let message = response.text().await.unwrap_or_default();
        if status == StatusCode::FORBIDDEN {
            error!(
                "LOGS | Request was denied by Datadog: Access denied. Please verify that your API key is valid."
            );
        }
        Err(classify_status(status, message))
    }
}

/// 408, 429 and 5xx are worth retrying. Any other status is final.
fn classify_status(status: StatusCode, message: String) -> SubmitError {
    if status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
    {
        SubmitError::Transient(format!("status {}: {}", status.as_u16(), message))
    } else {
        SubmitError::Rejected {
            status: status.as_u16(),
            message,
        }
    }
}
