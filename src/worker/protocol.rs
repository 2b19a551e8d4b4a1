// SPDX-FileCopyrightText: 2026 ArcheBase
//
// SPDX-License-Identifier: MulanPSL-2.0

//! Requests exchanged with a worker thread.
//!
//! Every request carries its own reply sender; the worker answers exactly
//! once. Payloads are moved through the channels, never copied.

use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};

use crate::core::{Result, Time};
use crate::io::metadata::{Initialization, IteratorResult, MessageEvent};
use crate::io::traits::{GetBackfillMessagesArgs, MessageIteratorArgs};

/// Identifies a cursor owned by the worker.
pub type CursorId = u64;

/// One-shot reply channel.
pub type Reply<T> = Sender<Result<T>>;

/// Request sent to a worker.
pub enum WorkerRequest {
    /// Initialize the source
    Initialize {
        /// Reply channel
        reply: Reply<Initialization>,
    },
    /// Open a cursor
    OpenCursor {
        /// Iterator arguments
        args: MessageIteratorArgs,
        /// Reply channel
        reply: Reply<CursorId>,
    },
    /// Read one result
    Next {
        /// Target cursor
        cursor: CursorId,
        /// Reply channel
        reply: Reply<Option<IteratorResult>>,
    },
    /// Read a time-budgeted batch
    NextBatch {
        /// Target cursor
        cursor: CursorId,
        /// Time budget for the batch
        budget: Duration,
        /// Reply channel
        reply: Reply<Option<Vec<IteratorResult>>>,
    },
    /// Read every result up to a receive time
    ReadUntil {
        /// Target cursor
        cursor: CursorId,
        /// Inclusive end time
        end: Time,
        /// Reply channel
        reply: Reply<Option<Vec<IteratorResult>>>,
    },
    /// Release a cursor
    EndCursor {
        /// Target cursor
        cursor: CursorId,
        /// Reply channel
        reply: Reply<()>,
    },
    /// Latest message per topic at a time
    Backfill {
        /// Backfill arguments
        args: GetBackfillMessagesArgs,
        /// Reply channel
        reply: Reply<Vec<MessageEvent>>,
    },
    /// Terminate the source and stop the worker
    Terminate {
        /// Reply channel
        reply: Reply<()>,
    },
}

impl WorkerRequest {
    /// Request name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            WorkerRequest::Initialize { .. } => "initialize",
            WorkerRequest::OpenCursor { .. } => "open_cursor",
            WorkerRequest::Next { .. } => "next",
            WorkerRequest::NextBatch { .. } => "next_batch",
            WorkerRequest::ReadUntil { .. } => "read_until",
            WorkerRequest::EndCursor { .. } => "end_cursor",
            WorkerRequest::Backfill { .. } => "backfill",
            WorkerRequest::Terminate { .. } => "terminate",
        }
    }
}

impl std::fmt::Debug for WorkerRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerRequest")
            .field("kind", &self.kind())
            .field("reply", &"...")
            .finish()
    }
}

/// Sender end of a worker's request channel.
pub type RequestSender = Sender<WorkerRequest>;

/// Receiver end of a worker's request channel.
pub type RequestReceiver = Receiver<WorkerRequest>;

/// Create a request channel pair.
pub fn request_channel() -> (RequestSender, RequestReceiver) {
    crossbeam_channel::unbounded()
}
