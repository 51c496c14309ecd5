// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The single open batch and its atomic drain.
//!
//! ```text
//!   add ──> ┌─────────────┐  drain  ┌─────────────┐
//!           │ open batch  │ ──────> │ closed batch│ ──> delivery
//!           └─────────────┘         └─────────────┘
//!                 ^ replaced by a fresh empty batch in the same critical section
//! ```
//!
//! The ingestion path, the interval timer and the shutdown drain all share one
//! accumulator. Every read or swap of the open batch happens under one mutex,
//! so a record is either in the batch a drain returned or in the next one,
//! never both and never neither.

use std::fmt;
use std::mem;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use rand::Rng;

use crate::transform::LogItem;

/// Identifier of a batch, `<unix millis>_<0..1000>`.
///
/// Only used to correlate log lines about the same batch. Not unique enough
/// for deduplication and never used for it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BucketToken(String);

impl BucketToken {
    #[must_use]
    pub fn generate() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |elapsed| elapsed.as_millis());
        let suffix: u16 = rand::thread_rng().gen_range(0..1000);
        BucketToken(format!("{millis}_{suffix}"))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BucketToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Item count and byte total of a batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchTotals {
    pub count: usize,
    pub size_bytes: usize,
}

/// An ordered group of items bound for one submission.
///
/// Only the accumulator can append to a batch. Once handed out by a drain it
/// is read-only.
#[derive(Debug)]
pub struct LogBatch {
    token: BucketToken,
    items: Vec<LogItem>,
    size_bytes: usize,
}

impl LogBatch {
    fn new() -> Self {
        LogBatch {
            token: BucketToken::generate(),
            items: Vec::new(),
            size_bytes: 0,
        }
    }

    /// One-item batch for immediate mode.
    #[must_use]
    pub fn single(item: LogItem, item_size: usize) -> Self {
        let mut batch = LogBatch::new();
        batch.push(item, item_size);
        batch
    }

    fn push(&mut self, item: LogItem, item_size: usize) {
        self.items.push(item);
        self.size_bytes += item_size;
    }

    #[must_use]
    pub fn token(&self) -> &BucketToken {
        &self.token
    }

    #[must_use]
    pub fn items(&self) -> &[LogItem] {
        &self.items
    }

    #[must_use]
    pub fn into_items(self) -> Vec<LogItem> {
        self.items
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    #[must_use]
    pub fn size_bytes(&self) -> usize {
        self.size_bytes
    }

    #[must_use]
    pub fn totals(&self) -> BatchTotals {
        BatchTotals {
            count: self.items.len(),
            size_bytes: self.size_bytes,
        }
    }
}

#[derive(Debug)]
struct OpenSlot {
    batch: LogBatch,
    closed: bool,
}

/// Holds exactly one open [`LogBatch`].
///
/// Once [`BatchAccumulator::close`] ran, [`BatchAccumulator::try_add`] refuses
/// every item, so nothing can land in a batch no one will drain.
#[derive(Debug)]
pub struct BatchAccumulator {
    open: Mutex<OpenSlot>,
}

impl Default for BatchAccumulator {
    fn default() -> Self {
        BatchAccumulator {
            open: Mutex::new(OpenSlot {
                batch: LogBatch::new(),
                closed: false,
            }),
        }
    }
}

impl BatchAccumulator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // Poisoning is ignored: no critical section can leave the batch half-updated.
    fn open(&self) -> MutexGuard<'_, OpenSlot> {
        self.open.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends `item` to the open batch and returns the totals after the add.
    ///
    /// Enforces no limit; the scheduler decides what to do with the totals.
    pub fn add(&self, item: LogItem, item_size: usize) -> BatchTotals {
        let mut open = self.open();
        open.batch.push(item, item_size);
        open.batch.totals()
    }

    /// Like [`BatchAccumulator::add`], but hands `item` back once the
    /// accumulator is closed. The check and the append share one lock.
    pub fn try_add(&self, item: LogItem, item_size: usize) -> Result<BatchTotals, LogItem> {
        let mut open = self.open();
        if open.closed {
            return Err(item);
        }
        open.batch.push(item, item_size);
        Ok(open.batch.totals())
    }

    #[must_use]
    pub fn current_size(&self) -> usize {
        self.open().batch.size_bytes
    }

    #[must_use]
    pub fn current_count(&self) -> usize {
        self.open().batch.items.len()
    }

    /// Detaches the open batch and starts a new empty one with a new token.
    ///
    /// Returns an empty batch when nothing was added since the last drain.
    #[must_use]
    pub fn drain(&self) -> LogBatch {
        mem::replace(&mut self.open().batch, LogBatch::new())
    }

    /// Drains only if `should_drain` holds for the open batch's totals.
    ///
    /// The check and the swap happen under the same lock.
    pub fn drain_if(&self, should_drain: impl FnOnce(BatchTotals) -> bool) -> Option<LogBatch> {
        let mut open = self.open();
        if should_drain(open.batch.totals()) {
            Some(mem::replace(&mut open.batch, LogBatch::new()))
        } else {
            None
        }
    }

    /// Refuses further [`BatchAccumulator::try_add`] calls and drains, in one
    /// critical section. Closing twice returns an empty batch.
    #[must_use]
    pub fn close(&self) -> LogBatch {
        let mut open = self.open();
        open.closed = true;
        mem::replace(&mut open.batch, LogBatch::new())
    }

    /// Runs `f` unless the accumulator is closed. [`BatchAccumulator::close`]
    /// waits for `f` to return.
    pub fn while_open<R>(&self, f: impl FnOnce() -> R) -> Option<R> {
        let open = self.open();
        if open.closed {
            return None;
        }
        Some(f())
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.open().closed
    }
}
