// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! # Datadog Logs Batcher
//!
//! Accumulates structured log records into bounded batches and ships them to
//! the Datadog logs intake with bounded retry.
//!
//! ```text
//!   records ──> transform ──> accumulator ──> scheduler ──> delivery ──> intake
//!                                  ^              │
//!                                  └── timer ─────┘
//!                                  └── shutdown drain
//! ```
//!
//! - [`transform`]: record to wire-format [`transform::LogItem`] conversion
//! - [`accumulator`]: the single open batch and its atomic drain
//! - [`scheduler`]: size, count and interval flush triggers
//! - [`delivery`]: retrying, fire-and-forget submission of drained batches
//! - [`shutdown`]: one-shot final flush on process termination
//! - [`shipper`]: lifecycle object wiring everything together
//! - [`intake`]: HTTP implementation of [`delivery::LogSubmitter`]

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod accumulator;
pub mod callbacks;
pub mod config;
pub mod constants;
pub mod delivery;
pub mod error;
pub mod intake;
pub mod retry;
pub mod scheduler;
pub mod shipper;
pub mod shutdown;
pub mod transform;

#[cfg(test)]
mod test_support;
