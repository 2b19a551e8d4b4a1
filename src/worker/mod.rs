// SPDX-FileCopyrightText: 2026 ArcheBase
//
// SPDX-License-Identifier: MulanPSL-2.0

//! Worker isolation for sources.
//!
//! A worker is a dedicated thread that owns a source; the rest of the
//! engine talks to it only through request messages. Parsing therefore
//! never runs on the player thread, and a crashed worker surfaces as an
//! error instead of taking the caller down with it.
//!
//! - [`WorkerIterableSource`] - `IterableSource` facade over a worker
//! - [`WorkerCursor`] - cursor whose iterator lives in the worker
//! - [`InitWorker`] / [`ThreadWorker`] - how workers are spawned

pub mod cursor;
pub mod handle;
pub mod protocol;
pub mod source;

pub use cursor::{BatchIterator, WorkerCursor};
pub use handle::{serve_source, InitWorker, ThreadWorker, WorkerClient, WorkerHandle};
pub use protocol::{CursorId, WorkerRequest};
pub use source::{WorkerIterableSource, DEFAULT_BATCH_BUDGET};
