// SPDX-FileCopyrightText: 2026 ArcheBase
//
// SPDX-License-Identifier: MulanPSL-2.0

//! Read-ahead: a reader thread per playback run feeding the player.
//!
//! Batches travel through a bounded channel shared by all runs, each tagged
//! with the epoch of the run that read it. The player drops batches whose
//! epoch is not current.

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{SendTimeoutError, Sender};
use tracing::{debug, error, trace};

use crate::core::{PlaybackError, Result, Time};
use crate::io::metadata::IteratorResult;
use crate::io::traits::{IterableSource, MessageIteratorArgs};

/// Source shared between the player and its helper threads.
pub type SharedSource = Arc<RwLock<Box<dyn IterableSource>>>;

/// How long the reader sleeps between checks while parked or blocked.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// What a reader sends back.
#[derive(Debug)]
pub enum ReadEvent {
    /// Results in iteration order
    Batch(Vec<IteratorResult>),
    /// The cursor is exhausted
    Done,
    /// The cursor failed; the run is over
    Failed(PlaybackError),
}

/// A [`ReadEvent`] tagged with the epoch of its run.
#[derive(Debug)]
pub struct ReadMessage {
    /// Epoch of the run that produced the event
    pub epoch: u64,
    /// The event
    pub event: ReadEvent,
}

/// Run `f` on a helper thread, turning a panic into an iteration error so
/// the player still hears back from the thread.
pub(crate) fn guard_panic<T>(what: &str, f: impl FnOnce() -> Result<T>) -> Result<T> {
    catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|panic| {
        let message = panic
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        error!(context = "ReadAhead", what, panic = %message, "Helper thread panicked");
        Err(PlaybackError::iteration(format!("{what} panicked: {message}")))
    })
}

/// Handle to one reader thread.
///
/// Dropping the handle cancels the reader; it exits at its next check.
pub struct ReadAheadRun {
    cancel: Arc<AtomicBool>,
    horizon: Arc<AtomicU64>,
    thread: Option<JoinHandle<()>>,
}

impl ReadAheadRun {
    /// Spawn a reader for `args`, reading ahead up to `horizon`.
    pub fn start(
        source: SharedSource,
        args: MessageIteratorArgs,
        epoch: u64,
        horizon: Time,
        budget: Duration,
        sink: Sender<ReadMessage>,
    ) -> Result<Self> {
        let cancel = Arc::new(AtomicBool::new(false));
        let horizon = Arc::new(AtomicU64::new(horizon));
        let reader = Reader {
            epoch,
            cancel: cancel.clone(),
            horizon: horizon.clone(),
            budget,
            sink,
        };
        let thread = std::thread::Builder::new()
            .name(format!("roboplay-read-ahead:{epoch}"))
            .spawn(move || reader.run(source, args))
            .map_err(|e| PlaybackError::Other(format!("Failed to spawn reader: {e}")))?;

        Ok(Self {
            cancel,
            horizon,
            thread: Some(thread),
        })
    }

    /// Move the read-ahead horizon and wake the reader if it is parked.
    pub fn set_horizon(&self, horizon: Time) {
        if self.horizon.swap(horizon, Ordering::AcqRel) != horizon {
            if let Some(thread) = &self.thread {
                thread.thread().unpark();
            }
        }
    }

    /// Stop the reader without waiting for it.
    pub fn cancel(&mut self) {
        self.cancel.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            thread.thread().unpark();
        }
    }
}

impl Drop for ReadAheadRun {
    fn drop(&mut self) {
        self.cancel();
    }
}

struct Reader {
    epoch: u64,
    cancel: Arc<AtomicBool>,
    horizon: Arc<AtomicU64>,
    budget: Duration,
    sink: Sender<ReadMessage>,
}

impl Reader {
    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }

    fn run(self, source: SharedSource, args: MessageIteratorArgs) {
        if let Err(e) = guard_panic("Read-ahead", || self.read(source, args)) {
            self.send(ReadEvent::Failed(e));
        }
        debug!(context = "ReadAhead", epoch = self.epoch, "Reader finished");
    }

    fn read(&self, source: SharedSource, args: MessageIteratorArgs) -> Result<()> {
        let mut cursor = source
            .read()
            .map_err(|_| PlaybackError::Other("Source lock poisoned".to_string()))?
            .get_message_cursor(args)?;

        let mut last_time: Option<Time> = None;
        loop {
            if self.cancelled() {
                break;
            }
            if last_time.is_some_and(|t| t > self.horizon.load(Ordering::Acquire)) {
                std::thread::park_timeout(POLL_INTERVAL);
                continue;
            }

            match cursor.next_batch(self.budget) {
                Ok(Some(batch)) => {
                    if let Some(t) = batch.iter().rev().find_map(|r| r.time()) {
                        last_time = Some(t);
                    }
                    trace!(
                        context = "ReadAhead",
                        epoch = self.epoch,
                        results = batch.len(),
                        "Read batch"
                    );
                    if !self.send(ReadEvent::Batch(batch)) {
                        break;
                    }
                }
                Ok(None) => {
                    self.send(ReadEvent::Done);
                    break;
                }
                Err(e) => {
                    let _ = cursor.end();
                    return Err(e);
                }
            }
        }

        cursor.end()
    }

    /// Send unless cancelled first. Returns whether the event was delivered.
    fn send(&self, event: ReadEvent) -> bool {
        let mut message = ReadMessage {
            epoch: self.epoch,
            event,
        };
        loop {
            if self.cancelled() {
                return false;
            }
            match self.sink.send_timeout(message, POLL_INTERVAL) {
                Ok(()) => return true,
                Err(SendTimeoutError::Timeout(m)) => message = m,
                Err(SendTimeoutError::Disconnected(_)) => return false,
            }
        }
    }
}

/// Player-side buffer of results for the current run.
#[derive(Debug, Default)]
pub struct ReadBuffer {
    results: VecDeque<IteratorResult>,
    /// Latest receive time received in this run
    read_through: Option<Time>,
    done: bool,
}

impl ReadBuffer {
    /// Drop everything and start a new run.
    pub fn reset(&mut self) {
        self.results.clear();
        self.read_through = None;
        self.done = false;
    }

    /// Append a batch read by the current run.
    pub fn extend(&mut self, batch: Vec<IteratorResult>) {
        for result in batch {
            if let Some(t) = result.time() {
                self.read_through = Some(self.read_through.map_or(t, |r| r.max(t)));
            }
            self.results.push_back(result);
        }
    }

    /// Mark the run exhausted.
    pub fn finish(&mut self) {
        self.done = true;
    }

    /// Whether the run is exhausted.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Furthest time playback may advance to without skipping unread data.
    pub fn limit(&self, target: Time, current: Time) -> Time {
        if self.done {
            target
        } else {
            target.min(self.read_through.unwrap_or(current)).max(current)
        }
    }

    /// Take every result with time `<= until`, plus alerts ahead of the
    /// first later message.
    pub fn take_until(&mut self, until: Time) -> Vec<IteratorResult> {
        let mut taken = Vec::new();
        while let Some(front) = self.results.front() {
            if front.time().is_some_and(|t| t > until) {
                break;
            }
            if let Some(result) = self.results.pop_front() {
                taken.push(result);
            }
        }
        taken
    }

    /// Buffered time range.
    pub fn range(&self) -> (Option<Time>, Option<Time>) {
        let first = self.results.iter().find_map(|r| r.time());
        let last = self.results.iter().rev().find_map(|r| r.time());
        (first, last)
    }

    /// Number of buffered results.
    pub fn len(&self) -> usize {
        self.results.len()
    }

    /// Whether nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}
