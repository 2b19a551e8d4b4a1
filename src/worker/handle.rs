// SPDX-FileCopyrightText: 2026 ArcheBase
//
// SPDX-License-Identifier: MulanPSL-2.0

//! Worker threads and their handles.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use tracing::{debug, warn};

use crate::core::{PlaybackError, Result};
use crate::io::cursor::MessageCursor;
use crate::io::open::{open_source, InitArgs};
use crate::io::traits::IterableSource;

use super::protocol::{request_channel, CursorId, RequestReceiver, RequestSender, WorkerRequest};

/// Spawns the isolated context that owns a source.
pub trait InitWorker: Send + Sync {
    /// Start a worker for `args`.
    fn spawn(&self, args: &InitArgs) -> Result<WorkerHandle>;
}

/// Default worker: a dedicated thread that opens the source by format
/// detection and serves requests until terminated.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadWorker;

impl InitWorker for ThreadWorker {
    fn spawn(&self, args: &InitArgs) -> Result<WorkerHandle> {
        let args = args.clone();
        WorkerHandle::spawn(args.name(), move |requests| {
            serve_source(open_source(&args), requests)
        })
    }
}

/// Client side of a worker's request channel.
///
/// Cheap to clone; cursors keep one so they can outlive a borrow of the
/// source.
#[derive(Clone)]
pub struct WorkerClient {
    name: String,
    sender: RequestSender,
    initialized: Arc<AtomicBool>,
}

impl WorkerClient {
    /// Send a request built around a fresh reply channel and wait for the answer.
    pub fn call<T>(&self, make: impl FnOnce(super::protocol::Reply<T>) -> WorkerRequest) -> Result<T> {
        let (reply, response) = crossbeam_channel::bounded(1);
        self.sender.send(make(reply)).map_err(|_| self.lost())?;
        response.recv().map_err(|_| self.lost())?
    }

    /// Send a request without waiting for the answer.
    pub fn notify<T>(&self, make: impl FnOnce(super::protocol::Reply<T>) -> WorkerRequest) {
        let (reply, _response) = crossbeam_channel::bounded(1);
        let _ = self.sender.send(make(reply));
    }

    /// Worker display name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn mark_initialized(&self) {
        self.initialized.store(true, Ordering::Release);
    }

    /// Error for a worker that stopped answering.
    fn lost(&self) -> PlaybackError {
        if self.initialized.load(Ordering::Acquire) {
            PlaybackError::iteration(format!("Worker for {} exited unexpectedly", self.name))
        } else {
            PlaybackError::initialization(&self.name, "Worker exited before initialization")
        }
    }
}

/// Handle to a running worker thread.
///
/// Dropping the handle stops the worker and joins its thread.
pub struct WorkerHandle {
    client: WorkerClient,
    thread: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    /// Spawn a named worker thread running `body` over its request channel.
    pub fn spawn<F>(name: impl Into<String>, body: F) -> Result<Self>
    where
        F: FnOnce(RequestReceiver) + Send + 'static,
    {
        let name = name.into();
        let (sender, requests) = request_channel();
        let thread = std::thread::Builder::new()
            .name(format!("roboplay-worker:{name}"))
            .spawn(move || body(requests))
            .map_err(|e| PlaybackError::initialization(&name, format!("Failed to spawn worker: {e}")))?;

        debug!(context = "WorkerHandle", worker = %name, "Spawned worker");
        Ok(Self {
            client: WorkerClient {
                name,
                sender,
                initialized: Arc::new(AtomicBool::new(false)),
            },
            thread: Some(thread),
        })
    }

    /// Client for sending requests.
    pub fn client(&self) -> &WorkerClient {
        &self.client
    }

    /// Check if the worker thread is still running.
    pub fn is_alive(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Terminate the source, stop the worker and join it.
    pub fn shutdown(mut self) -> Result<()> {
        let result = match self.client.call(|reply| WorkerRequest::Terminate { reply }) {
            // A worker that already exited has nothing left to release
            Err(PlaybackError::Initialization { .. } | PlaybackError::Iteration { .. }) => Ok(()),
            other => other,
        };
        self.join();
        result
    }

    fn join(&mut self) {
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!(
                    context = "WorkerHandle",
                    worker = %self.client.name,
                    "Worker thread panicked"
                );
            }
        }
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        if self.thread.is_some() {
            // Cursors may still hold senders, so ask explicitly instead of
            // relying on disconnection.
            self.client.notify(|reply| WorkerRequest::Terminate { reply });
            self.join();
        }
    }
}

/// Serve requests against `source` until terminated or disconnected.
///
/// `source` is the outcome of opening the recording; an open failure is
/// reported to every request.
pub fn serve_source(source: Result<Box<dyn IterableSource>>, requests: RequestReceiver) {
    let (mut source, open_error) = match source {
        Ok(source) => (Some(source), None),
        Err(e) => (None, Some(e)),
    };
    let unavailable = |open_error: &Option<PlaybackError>| {
        open_error.clone().unwrap_or(PlaybackError::Closed)
    };
    let mut cursors: HashMap<CursorId, Box<dyn MessageCursor>> = HashMap::new();
    let mut next_cursor: CursorId = 0;

    for request in requests.iter() {
        match request {
            WorkerRequest::Initialize { reply } => {
                let result = match source.as_mut() {
                    Some(source) => source.initialize(),
                    None => Err(unavailable(&open_error)),
                };
                let _ = reply.send(result);
            }
            WorkerRequest::OpenCursor { args, reply } => {
                let result = match source.as_ref() {
                    Some(source) => source.get_message_cursor(args).map(|cursor| {
                        next_cursor += 1;
                        cursors.insert(next_cursor, cursor);
                        next_cursor
                    }),
                    None => Err(unavailable(&open_error)),
                };
                let _ = reply.send(result);
            }
            WorkerRequest::Next { cursor, reply } => {
                let _ = reply.send(with_cursor(&mut cursors, cursor, |c| c.next()));
            }
            WorkerRequest::NextBatch {
                cursor,
                budget,
                reply,
            } => {
                let _ = reply.send(with_cursor(&mut cursors, cursor, |c| c.next_batch(budget)));
            }
            WorkerRequest::ReadUntil { cursor, end, reply } => {
                let _ = reply.send(with_cursor(&mut cursors, cursor, |c| c.read_until(end)));
            }
            WorkerRequest::EndCursor { cursor, reply } => {
                let result = match cursors.remove(&cursor) {
                    Some(mut c) => c.end(),
                    None => Ok(()),
                };
                let _ = reply.send(result);
            }
            WorkerRequest::Backfill { args, reply } => {
                let result = match source.as_ref() {
                    Some(source) => source.get_backfill_messages(args),
                    None => Err(unavailable(&open_error)),
                };
                let _ = reply.send(result);
            }
            WorkerRequest::Terminate { reply } => {
                cursors.clear();
                let result = match source.take() {
                    Some(mut source) => source.terminate(),
                    None => Ok(()),
                };
                let _ = reply.send(result);
                debug!(context = "WorkerThread", "Worker terminated");
                return;
            }
        }
    }

    // All clients disconnected
    cursors.clear();
    if let Some(mut source) = source {
        if let Err(e) = source.terminate() {
            warn!(context = "WorkerThread", error = %e, "Failed to terminate source");
        }
    }
}

fn with_cursor<T>(
    cursors: &mut HashMap<CursorId, Box<dyn MessageCursor>>,
    id: CursorId,
    read: impl FnOnce(&mut Box<dyn MessageCursor>) -> Result<Option<T>>,
) -> Result<Option<T>> {
    match cursors.get_mut(&id) {
        Some(cursor) => {
            let result = read(cursor);
            if result.is_err() {
                cursors.remove(&id);
            }
            result
        }
        // Ended cursors read as exhausted
        None => Ok(None),
    }
}
