// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Datadog logs intake limits and the batching defaults derived from them.
//!
//! The intake rejects requests over 5 MiB, entries over 1 MiB and batches over
//! 1,000 entries. The batching ceilings sit a little under each hard limit so
//! that tags and request metadata never push a payload over.
//!
//! See <https://docs.datadoghq.com/api/latest/logs/#send-logs>.

/// Hard limit on an uncompressed request body accepted by the intake.
pub const INTAKE_MAX_CONTENT_SIZE_BYTES: usize = 5 * 1_024 * 1_024;

/// Hard limit on a single log entry accepted by the intake.
pub const INTAKE_MAX_LOG_SIZE_BYTES: usize = 1_024 * 1_024;

/// Hard limit on the number of entries in one request.
pub const INTAKE_MAX_BATCH_ENTRIES: usize = 1_000;

/// Flush once the open batch grows past ~4.9 MiB.
pub const MAX_CONTENT_SIZE_BYTES: usize = 5_138_022;

/// Report entries larger than ~0.95 MiB as oversized.
pub const MAX_LOG_SIZE_BYTES: usize = 996_147;

/// Flush once the open batch holds more than this many entries.
pub const MAX_BATCH_ENTRIES: usize = 995;

/// Period of the interval flush trigger.
pub const DEFAULT_SEND_INTERVAL_MS: u64 = 3_000;

/// Retries after the first failed submission attempt.
pub const DEFAULT_RETRIES: usize = 5;

/// First backoff delay of the default exponential retry policy.
pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 1_000;

/// Upper bound on a single backoff delay.
pub const DEFAULT_RETRY_MAX_DELAY_MS: u64 = 60_000;

/// Per-request timeout, in seconds.
pub const DEFAULT_FLUSH_TIMEOUT_SECS: u64 = 5;

pub const DEFAULT_COMPRESSION_LEVEL: u32 = 6;

pub const DEFAULT_SITE: &str = "datadoghq.com";
