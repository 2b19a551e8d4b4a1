// SPDX-FileCopyrightText: 2026 ArcheBase
//
// SPDX-License-Identifier: MulanPSL-2.0

//! Pull-based cursors over message iterators.
//!
//! A cursor lives for one playback run. It supports batched reads bounded
//! by a time budget and reads bounded by a receive time, which is what the
//! player's read-ahead loop needs.

use std::time::{Duration, Instant};

use crate::core::{Result, Time};

use super::metadata::IteratorResult;
use super::traits::MessageIterator;

/// Pull-based reader for one playback run.
///
/// After [`MessageCursor::end`] every read returns `Ok(None)`.
pub trait MessageCursor: Send {
    /// Next result, or `None` when exhausted.
    fn next(&mut self) -> Result<Option<IteratorResult>>;

    /// At least one result, then as many as fit within `budget`.
    ///
    /// Returns `None` when exhausted.
    fn next_batch(&mut self, budget: Duration) -> Result<Option<Vec<IteratorResult>>>;

    /// Every result with time `<= end`.
    ///
    /// The first result past `end` is held back for the next call. Alerts
    /// carry no time and are always included. Returns `None` when
    /// exhausted.
    fn read_until(&mut self, end: Time) -> Result<Option<Vec<IteratorResult>>>;

    /// Release the underlying iterator. Idempotent.
    fn end(&mut self) -> Result<()>;
}

/// Cursor backed by a local [`MessageIterator`].
pub struct IteratorCursor {
    iter: Option<Box<dyn MessageIterator>>,
    held: Option<IteratorResult>,
}

impl IteratorCursor {
    /// Wrap an iterator.
    pub fn new(iter: Box<dyn MessageIterator>) -> Self {
        Self {
            iter: Some(iter),
            held: None,
        }
    }

    fn pull(&mut self) -> Result<Option<IteratorResult>> {
        if let Some(held) = self.held.take() {
            return Ok(Some(held));
        }
        let Some(iter) = self.iter.as_mut() else {
            return Ok(None);
        };
        match iter.next() {
            Some(Ok(result)) => Ok(Some(result)),
            Some(Err(e)) => {
                self.iter = None;
                Err(e)
            }
            None => {
                self.iter = None;
                Ok(None)
            }
        }
    }
}

impl MessageCursor for IteratorCursor {
    fn next(&mut self) -> Result<Option<IteratorResult>> {
        self.pull()
    }

    fn next_batch(&mut self, budget: Duration) -> Result<Option<Vec<IteratorResult>>> {
        let started = Instant::now();
        let Some(first) = self.pull()? else {
            return Ok(None);
        };
        let mut batch = vec![first];
        while started.elapsed() < budget {
            match self.pull()? {
                Some(result) => batch.push(result),
                None => break,
            }
        }
        Ok(Some(batch))
    }

    fn read_until(&mut self, end: Time) -> Result<Option<Vec<IteratorResult>>> {
        let mut batch = Vec::new();
        loop {
            match self.pull()? {
                Some(result) => {
                    if result.time().is_some_and(|t| t > end) {
                        self.held = Some(result);
                        break;
                    }
                    batch.push(result);
                }
                None if batch.is_empty() => return Ok(None),
                None => break,
            }
        }
        Ok(Some(batch))
    }

    fn end(&mut self) -> Result<()> {
        self.iter = None;
        self.held = None;
        Ok(())
    }
}
