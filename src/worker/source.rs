// SPDX-FileCopyrightText: 2026 ArcheBase
//
// SPDX-License-Identifier: MulanPSL-2.0

//! Source wrapper delegating to a worker.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::core::{PlaybackError, Result};
use crate::io::cursor::MessageCursor;
use crate::io::metadata::{Initialization, MessageEvent};
use crate::io::open::InitArgs;
use crate::io::traits::{GetBackfillMessagesArgs, IterableSource, MessageIterator, MessageIteratorArgs};

use super::cursor::{BatchIterator, WorkerCursor};
use super::handle::{InitWorker, ThreadWorker, WorkerHandle};
use super::protocol::WorkerRequest;

/// Default time budget for batches fetched by [`IterableSource::message_iterator`].
pub const DEFAULT_BATCH_BUDGET: Duration = Duration::from_millis(17);

/// [`IterableSource`] whose parsing happens inside a worker.
///
/// The worker is spawned on `initialize` and stopped on `terminate` or drop.
pub struct WorkerIterableSource {
    args: InitArgs,
    factory: Arc<dyn InitWorker>,
    handle: Option<WorkerHandle>,
    batch_budget: Duration,
}

impl WorkerIterableSource {
    /// Wrap the recording described by `args`, spawning workers with `factory`.
    pub fn new(args: InitArgs, factory: Arc<dyn InitWorker>) -> Self {
        Self {
            args,
            factory,
            handle: None,
            batch_budget: DEFAULT_BATCH_BUDGET,
        }
    }

    /// Wrap `args` with the default [`ThreadWorker`].
    pub fn with_thread_worker(args: InitArgs) -> Self {
        Self::new(args, Arc::new(ThreadWorker))
    }

    /// Set the batch budget used by `message_iterator`.
    pub fn with_batch_budget(mut self, budget: Duration) -> Self {
        self.batch_budget = budget;
        self
    }

    /// Whether a worker is currently running.
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| h.is_alive())
    }

    fn handle(&self) -> Result<&WorkerHandle> {
        self.handle.as_ref().ok_or(PlaybackError::Closed)
    }

    fn open_cursor(&self, args: MessageIteratorArgs) -> Result<WorkerCursor> {
        let client = self.handle()?.client();
        let id = client.call(|reply| WorkerRequest::OpenCursor { args, reply })?;
        Ok(WorkerCursor::new(client.clone(), id))
    }
}

impl IterableSource for WorkerIterableSource {
    fn initialize(&mut self) -> Result<Initialization> {
        let name = self.args.name();
        if self.handle.is_none() {
            self.handle = Some(self.factory.spawn(&self.args)?);
        }
        let client = self.handle()?.client();

        let init = client
            .call(|reply| WorkerRequest::Initialize { reply })
            .map_err(|e| match e {
                e @ PlaybackError::Initialization { .. } => e,
                other => PlaybackError::initialization(&name, other),
            })?;
        client.mark_initialized();

        info!(
            context = "WorkerIterableSource",
            worker = client.name(),
            start = init.start,
            end = init.end,
            topics = init.topics.len(),
            "Worker initialized"
        );
        Ok(init)
    }

    fn message_iterator(&self, args: MessageIteratorArgs) -> Result<Box<dyn MessageIterator>> {
        let cursor = self.open_cursor(args)?;
        Ok(Box::new(BatchIterator::new(cursor, self.batch_budget)))
    }

    fn get_backfill_messages(&self, args: GetBackfillMessagesArgs) -> Result<Vec<MessageEvent>> {
        self.handle()?
            .client()
            .call(|reply| WorkerRequest::Backfill { args, reply })
    }

    fn get_message_cursor(&self, args: MessageIteratorArgs) -> Result<Box<dyn MessageCursor>> {
        Ok(Box::new(self.open_cursor(args)?))
    }

    fn terminate(&mut self) -> Result<()> {
        match self.handle.take() {
            Some(handle) => {
                debug!(
                    context = "WorkerIterableSource",
                    worker = handle.client().name(),
                    "Stopping worker"
                );
                handle.shutdown()
            }
            None => Ok(()),
        }
    }
}
