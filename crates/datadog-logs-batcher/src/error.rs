// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

/// Failure of a single submission attempt against the intake.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubmitError {
    /// Network error, timeout, 408, 429 or 5xx. Worth another attempt.
    #[error("transient intake failure: {0}")]
    Transient(String),

    /// The intake refused the payload. Retrying the same items cannot succeed.
    #[error("intake rejected payload with status {status}: {message}")]
    Rejected { status: u16, message: String },

    /// The payload could not be built.
    #[error("failed to encode payload: {0}")]
    Encoding(String),
}

impl SubmitError {
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, SubmitError::Transient(_))
    }
}

/// Errors surfaced to the host, through `on_error` or from constructors.
#[derive(Debug, thiserror::Error)]
pub enum BatcherError {
    #[error("Log entry exceeds size limit of {limit} bytes: {size}")]
    OversizedItem { size: usize, limit: usize },

    #[error("Failed to deliver logs after {attempts} attempts: {source}")]
    Delivery {
        attempts: usize,
        #[source]
        source: SubmitError,
    },

    #[error("Log shipper is shut down, record dropped")]
    Closed,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to build HTTP client: {0}")]
    Client(String),
}
