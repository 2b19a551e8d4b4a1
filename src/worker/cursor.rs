// SPDX-FileCopyrightText: 2026 ArcheBase
//
// SPDX-License-Identifier: MulanPSL-2.0

//! Cursors whose iterator lives inside a worker.

use std::collections::VecDeque;
use std::time::Duration;

use crate::core::{Result, Time};
use crate::io::cursor::MessageCursor;
use crate::io::metadata::IteratorResult;

use super::handle::WorkerClient;
use super::protocol::{CursorId, WorkerRequest};

/// Cursor over an iterator owned by a worker. One request per call.
pub struct WorkerCursor {
    client: WorkerClient,
    id: CursorId,
    ended: bool,
}

impl WorkerCursor {
    pub(crate) fn new(client: WorkerClient, id: CursorId) -> Self {
        Self {
            client,
            id,
            ended: false,
        }
    }
}

impl MessageCursor for WorkerCursor {
    fn next(&mut self) -> Result<Option<IteratorResult>> {
        if self.ended {
            return Ok(None);
        }
        let cursor = self.id;
        self.client.call(|reply| WorkerRequest::Next { cursor, reply })
    }

    fn next_batch(&mut self, budget: Duration) -> Result<Option<Vec<IteratorResult>>> {
        if self.ended {
            return Ok(None);
        }
        let cursor = self.id;
        self.client.call(|reply| WorkerRequest::NextBatch {
            cursor,
            budget,
            reply,
        })
    }

    fn read_until(&mut self, end: Time) -> Result<Option<Vec<IteratorResult>>> {
        if self.ended {
            return Ok(None);
        }
        let cursor = self.id;
        self.client
            .call(|reply| WorkerRequest::ReadUntil { cursor, end, reply })
    }

    fn end(&mut self) -> Result<()> {
        if std::mem::replace(&mut self.ended, true) {
            return Ok(());
        }
        let cursor = self.id;
        self.client.call(|reply| WorkerRequest::EndCursor { cursor, reply })
    }
}

impl Drop for WorkerCursor {
    fn drop(&mut self) {
        if !self.ended {
            let cursor = self.id;
            self.client
                .notify(|reply| WorkerRequest::EndCursor { cursor, reply });
        }
    }
}

/// Iterator adapter pulling time-budgeted batches from a cursor.
pub struct BatchIterator<C> {
    cursor: C,
    budget: Duration,
    buffer: VecDeque<IteratorResult>,
    done: bool,
}

impl<C: MessageCursor> BatchIterator<C> {
    /// Iterate `cursor`, fetching batches of up to `budget` worth of reads.
    pub fn new(cursor: C, budget: Duration) -> Self {
        Self {
            cursor,
            budget,
            buffer: VecDeque::new(),
            done: false,
        }
    }
}

impl<C: MessageCursor> Iterator for BatchIterator<C> {
    type Item = Result<IteratorResult>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(result) = self.buffer.pop_front() {
            return Some(Ok(result));
        }
        if self.done {
            return None;
        }
        match self.cursor.next_batch(self.budget) {
            Ok(Some(batch)) => {
                self.buffer.extend(batch);
                self.buffer.pop_front().map(Ok)
            }
            Ok(None) => {
                self.done = true;
                let _ = self.cursor.end();
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
