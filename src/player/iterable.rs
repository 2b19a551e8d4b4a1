// SPDX-FileCopyrightText: 2026 ArcheBase
//
// SPDX-License-Identifier: MulanPSL-2.0

//! The iterable player state machine.
//!
//! The player owns one source and runs on a single logical thread: every
//! transition happens inside one of its methods. Reads and backfills run on
//! helper threads and report back through channels; each report carries the
//! epoch it was started under, and reports from an older epoch are dropped.

use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use tracing::{debug, error, info, trace, warn};

use crate::core::time::{clamp, scaled_advance};
use crate::core::{PlaybackError, Result, Time};
use crate::io::filter::TopicFilter;
use crate::io::metadata::{Alert, Initialization, IteratorResult, MessageEvent};
use crate::io::traits::{GetBackfillMessagesArgs, IterableSource, MessageIteratorArgs};

use super::alerts::HighFrequencyDetector;
use super::clock::{Clock, SystemClock};
use super::config::PlayerConfig;
use super::read_ahead::{guard_panic, ReadAheadRun, ReadBuffer, ReadEvent, ReadMessage, SharedSource};
use super::state::{ActiveData, PlaybackProgress, PlayerState, PlayerStateSnapshot, Presence};

/// Callback receiving every published snapshot.
pub type StateListener = Box<dyn FnMut(&PlayerStateSnapshot) + Send>;

/// Wait used while a backfill or read is outstanding.
const BUSY_POLL: Duration = Duration::from_millis(5);

struct BackfillReport {
    epoch: u64,
    result: Result<Vec<MessageEvent>>,
}

/// Plays one source: seeking with backfill, read-ahead and paced emission.
pub struct IterablePlayer {
    source: SharedSource,
    config: PlayerConfig,
    clock: Arc<dyn Clock>,
    listener: Option<StateListener>,

    state: PlayerState,
    presence: Presence,
    init: Option<Initialization>,
    alerts: Vec<Alert>,
    error: Option<PlaybackError>,

    subscriptions: Vec<String>,
    subscriptions_changed: bool,
    speed: f64,

    current_time: Time,
    last_seek_time: Option<Time>,
    until: Option<Time>,
    /// Mode restored once the pending seek completes
    resume_playing: bool,

    epoch: u64,
    run: Option<ReadAheadRun>,
    buffer: ReadBuffer,
    reads_tx: Sender<ReadMessage>,
    reads_rx: Receiver<ReadMessage>,
    backfill_tx: Sender<BackfillReport>,
    backfill_rx: Receiver<BackfillReport>,

    pending_messages: Vec<MessageEvent>,
    total_bytes_received: u64,
    high_frequency: HighFrequencyDetector,

    last_tick: Option<Instant>,
    last_emit: Option<Instant>,
}

impl IterablePlayer {
    /// Create a player over `source`. Nothing happens until [`initialize`](Self::initialize).
    pub fn new(source: Box<dyn IterableSource>, config: PlayerConfig) -> Self {
        let (reads_tx, reads_rx) = crossbeam_channel::bounded(config.max_pending_reads.max(1));
        let (backfill_tx, backfill_rx) = crossbeam_channel::unbounded();
        Self {
            source: Arc::new(RwLock::new(source)),
            speed: config.speed,
            high_frequency: HighFrequencyDetector::new(config.high_frequency_threshold_hz),
            config,
            clock: Arc::new(SystemClock),
            listener: None,
            state: PlayerState::Idle,
            presence: Presence::Initializing,
            init: None,
            alerts: Vec::new(),
            error: None,
            subscriptions: Vec::new(),
            subscriptions_changed: false,
            current_time: 0,
            last_seek_time: None,
            until: None,
            resume_playing: false,
            epoch: 0,
            run: None,
            buffer: ReadBuffer::default(),
            reads_tx,
            reads_rx,
            backfill_tx,
            backfill_rx,
            pending_messages: Vec::new(),
            total_bytes_received: 0,
            last_tick: None,
            last_emit: None,
        }
    }

    /// Use `clock` instead of the system clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Receive every published snapshot.
    pub fn set_listener<F>(&mut self, listener: F)
    where
        F: FnMut(&PlayerStateSnapshot) + Send + 'static,
    {
        self.listener = Some(Box::new(listener));
    }

    /// Current state.
    pub fn state(&self) -> PlayerState {
        self.state
    }

    /// Current playback time.
    pub fn current_time(&self) -> Time {
        self.current_time
    }

    /// Current playback speed.
    pub fn speed(&self) -> f64 {
        self.speed
    }

    /// Fatal error that stopped the player, if any.
    pub fn error(&self) -> Option<&PlaybackError> {
        self.error.as_ref()
    }

    /// Source description, once initialized.
    pub fn initialization(&self) -> Option<&Initialization> {
        self.init.as_ref()
    }

    /// Current subscriptions.
    pub fn subscriptions(&self) -> &[String] {
        &self.subscriptions
    }

    /// Build a snapshot of the current state without publishing it.
    pub fn snapshot(&self) -> PlayerStateSnapshot {
        self.build_snapshot(self.pending_messages.clone())
    }

    /// Initialize the source, publish its summary and seek to its start.
    ///
    /// The player is `Seeking` on return; [`settle`](Self::settle) or
    /// [`tick`](Self::tick) completes the initial backfill into `Paused`.
    pub fn initialize(&mut self) -> Result<()> {
        if self.state != PlayerState::Idle {
            return Err(PlaybackError::invalid_argument(format!(
                "Cannot initialize a player that is {}",
                self.state
            )));
        }
        self.state = PlayerState::Initializing;
        self.presence = Presence::Initializing;
        self.emit();

        let init = match self.with_source_mut(|source| source.initialize()) {
            Ok(init) => init,
            Err(e) => {
                self.fail(e.clone());
                return Err(e);
            }
        };

        info!(
            context = "IterablePlayer",
            name = %init.name,
            start = init.start,
            end = init.end,
            topics = init.topics.len(),
            alerts = init.alerts.len(),
            "Source initialized"
        );
        self.alerts.extend(init.alerts.iter().cloned());
        let start = init.start;
        self.init = Some(init);
        self.presence = Presence::Present;
        self.state = PlayerState::Paused;
        self.begin_seek(start);
        Ok(())
    }

    /// Replace the subscribed topics.
    ///
    /// While playing the read-ahead is reopened right away; otherwise the
    /// change applies to the next playback run.
    pub fn set_subscriptions<I, S>(&mut self, topics: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut topics: Vec<String> = topics.into_iter().map(Into::into).collect();
        topics.sort();
        topics.dedup();
        if topics == self.subscriptions {
            return;
        }
        debug!(context = "IterablePlayer", topics = ?topics, "Subscriptions changed");
        self.subscriptions = topics;
        self.subscriptions_changed = true;
        if self.state == PlayerState::Playing {
            self.reopen_run();
        }
    }

    /// Set the playback speed multiplier. Must be positive and finite.
    pub fn set_playback_speed(&mut self, speed: f64) -> Result<()> {
        if !(speed.is_finite() && speed > 0.0) {
            return Err(PlaybackError::invalid_argument(format!(
                "Playback speed must be positive and finite, got {speed}"
            )));
        }
        if self.state.is_terminal() {
            return Err(self.terminal_error());
        }
        self.speed = speed;
        self.emit();
        Ok(())
    }

    /// Start advancing. No-op if already playing.
    pub fn start_playback(&mut self) -> Result<()> {
        self.ensure_active()?;
        match self.state {
            PlayerState::Playing => return Ok(()),
            PlayerState::Seeking => {
                self.resume_playing = true;
                return Ok(());
            }
            _ => {}
        }
        if self.subscriptions_changed {
            self.reopen_run();
        }
        self.enter_playing();
        self.emit();
        Ok(())
    }

    /// Stop advancing. No-op if already paused; read-ahead is kept.
    pub fn pause_playback(&mut self) -> Result<()> {
        self.ensure_active()?;
        match self.state {
            PlayerState::Playing => {
                self.until = None;
                self.state = PlayerState::Paused;
                self.emit();
            }
            PlayerState::Seeking => {
                self.until = None;
                self.resume_playing = false;
            }
            _ => {}
        }
        Ok(())
    }

    /// Jump to `time`, clamped into the source range.
    ///
    /// In-flight reads and any pending [`play_until`](Self::play_until) are
    /// abandoned. Completion publishes the backfill for every subscribed
    /// topic and restores the previous playing or paused mode.
    pub fn seek_playback(&mut self, time: Time) -> Result<()> {
        self.ensure_active()?;
        self.begin_seek(time);
        Ok(())
    }

    /// Play through every message up to `time`, then pause exactly at `time`.
    pub fn play_until(&mut self, time: Time) -> Result<()> {
        self.ensure_active()?;
        let (start, end) = self.range();
        let target = clamp(time, start, end);

        if self.state == PlayerState::Seeking {
            self.until = Some(target);
            self.resume_playing = true;
            return Ok(());
        }
        if target <= self.current_time {
            return self.pause_playback();
        }

        if self.subscriptions_changed {
            self.reopen_run();
        }
        self.until = Some(target);
        self.enter_playing();
        self.update_horizon();
        self.emit();
        Ok(())
    }

    /// Advance the state machine: collect reads and backfills, move the
    /// playback time and publish a snapshot when one is due.
    pub fn tick(&mut self) {
        self.drain_reports();

        let now = self.clock.now();
        let elapsed = self
            .last_tick
            .map(|t| now.saturating_duration_since(t))
            .unwrap_or_default();
        self.last_tick = Some(now);

        if self.state != PlayerState::Playing {
            self.update_horizon();
            return;
        }

        let (_, end) = self.range();
        let target = match self.until {
            Some(until) => until,
            None => {
                let step = elapsed.min(self.config.max_tick_advance());
                self.current_time
                    .saturating_add(scaled_advance(step, self.speed))
            }
        }
        .min(end);

        let limit = self.buffer.limit(target, self.current_time);
        for result in self.buffer.take_until(limit) {
            match result {
                IteratorResult::MessageEvent(event) => {
                    if let Some(alert) = self
                        .high_frequency
                        .observe(&event.topic, event.receive_time)
                    {
                        warn!(context = "IterablePlayer", topic = %event.topic, "High-frequency topic");
                        self.alerts.push(alert);
                    }
                    self.pending_messages.push(event);
                }
                IteratorResult::Alert { alert, .. } => self.alerts.push(alert),
                IteratorResult::Stamp(_) => {}
            }
        }
        let advanced = limit != self.current_time;
        self.current_time = limit;
        self.update_horizon();

        let reached_until = self.until.is_some_and(|until| self.current_time >= until);
        if reached_until || self.current_time >= end {
            debug!(
                context = "IterablePlayer",
                time = self.current_time,
                until = ?self.until,
                "Playback stopped"
            );
            self.until = None;
            self.state = PlayerState::Paused;
            self.emit();
            return;
        }

        let due = self
            .last_emit
            .map_or(true, |t| now.saturating_duration_since(t) >= self.config.tick_interval());
        if (advanced || !self.pending_messages.is_empty()) && due {
            self.emit();
        }
    }

    /// Time until the next [`tick`](Self::tick) has work, or `None` when idle.
    pub fn next_wakeup(&self) -> Option<Duration> {
        match self.state {
            PlayerState::Playing if self.until.is_some() => Some(BUSY_POLL),
            PlayerState::Playing => {
                let since = self
                    .last_tick
                    .map(|t| self.clock.now().saturating_duration_since(t))
                    .unwrap_or_default();
                Some(self.config.tick_interval().saturating_sub(since))
            }
            PlayerState::Seeking => Some(BUSY_POLL),
            _ => None,
        }
    }

    /// Block until outstanding seeks and `play_until` targets complete.
    ///
    /// Returns the fatal error if the player failed on the way.
    pub fn settle(&mut self) -> Result<()> {
        loop {
            self.tick();
            match self.state {
                PlayerState::Errored => return Err(self.terminal_error()),
                PlayerState::Seeking => {}
                PlayerState::Playing if self.until.is_some() => {}
                _ => return Ok(()),
            }
            self.wait_for_report(BUSY_POLL);
        }
    }

    /// Cancel reads, terminate the source and close. Idempotent.
    pub fn close(&mut self) -> Result<()> {
        if self.state == PlayerState::Closed {
            return Ok(());
        }
        self.epoch += 1;
        self.cancel_run();
        self.until = None;
        let result = self.with_source_mut(|source| source.terminate());
        self.state = PlayerState::Closed;
        info!(context = "IterablePlayer", "Player closed");
        self.emit();
        result
    }

    fn range(&self) -> (Time, Time) {
        self.init.as_ref().map_or((0, 0), |i| (i.start, i.end))
    }

    fn terminal_error(&self) -> PlaybackError {
        self.error.clone().unwrap_or(PlaybackError::Closed)
    }

    fn ensure_active(&self) -> Result<()> {
        match self.state {
            PlayerState::Idle | PlayerState::Initializing => Err(PlaybackError::invalid_argument(
                "Player is not initialized",
            )),
            PlayerState::Closed | PlayerState::Errored => Err(self.terminal_error()),
            _ => Ok(()),
        }
    }

    fn with_source_mut<T>(
        &self,
        f: impl FnOnce(&mut Box<dyn IterableSource>) -> Result<T>,
    ) -> Result<T> {
        let mut source = self
            .source
            .write()
            .map_err(|_| PlaybackError::Other("Source lock poisoned".to_string()))?;
        f(&mut *source)
    }

    fn enter_playing(&mut self) {
        self.state = PlayerState::Playing;
        self.last_tick = Some(self.clock.now());
    }

    fn horizon(&self) -> Time {
        let ahead = self.current_time.saturating_add(self.config.read_ahead_nanos());
        self.until.map_or(ahead, |until| ahead.max(until))
    }

    fn update_horizon(&self) {
        if let Some(run) = &self.run {
            run.set_horizon(self.horizon());
        }
    }

    fn begin_seek(&mut self, time: Time) {
        let (start, end) = self.range();
        let target = clamp(time, start, end);
        if self.state != PlayerState::Seeking {
            self.resume_playing = self.state == PlayerState::Playing;
        }
        debug!(
            context = "IterablePlayer",
            requested = time,
            target,
            epoch = self.epoch + 1,
            "Seeking"
        );

        self.epoch += 1;
        self.until = None;
        self.current_time = target;
        self.last_seek_time = Some(target);
        self.pending_messages.clear();
        self.high_frequency.reset_windows();
        self.state = PlayerState::Seeking;

        self.spawn_backfill(target);
        self.start_run();
        self.emit();
    }

    /// Restart reading at the current time under a new epoch.
    fn reopen_run(&mut self) {
        self.epoch += 1;
        self.start_run();
    }

    fn cancel_run(&mut self) {
        if let Some(mut run) = self.run.take() {
            run.cancel();
        }
        self.buffer.reset();
    }

    fn start_run(&mut self) {
        self.cancel_run();
        self.subscriptions_changed = false;
        if self.state.is_terminal() {
            return;
        }

        let (_, end) = self.range();
        let args = MessageIteratorArgs::forward(TopicFilter::include(self.subscriptions.clone()))
            .start(self.current_time.saturating_add(1))
            .end(end);
        match ReadAheadRun::start(
            self.source.clone(),
            args,
            self.epoch,
            self.horizon(),
            self.config.batch_budget(),
            self.reads_tx.clone(),
        ) {
            Ok(run) => self.run = Some(run),
            Err(e) => self.fail(e),
        }
    }

    fn spawn_backfill(&mut self, time: Time) {
        let source = self.source.clone();
        let sink = self.backfill_tx.clone();
        let epoch = self.epoch;
        let args = GetBackfillMessagesArgs {
            topics: self.subscriptions.clone(),
            time,
        };
        let spawned = std::thread::Builder::new()
            .name(format!("roboplay-backfill:{epoch}"))
            .spawn(move || {
                let result = guard_panic("Backfill", || {
                    source
                        .read()
                        .map_err(|_| PlaybackError::Other("Source lock poisoned".to_string()))?
                        .get_backfill_messages(args)
                });
                let _ = sink.send(BackfillReport { epoch, result });
            });
        if let Err(e) = spawned {
            self.fail(PlaybackError::Other(format!("Failed to spawn backfill: {e}")));
        }
    }

    fn drain_reports(&mut self) {
        while let Ok(report) = self.backfill_rx.try_recv() {
            self.handle_backfill(report);
        }
        while let Ok(message) = self.reads_rx.try_recv() {
            self.handle_read(message);
        }
    }

    fn wait_for_report(&mut self, timeout: Duration) {
        let backfills = self.backfill_rx.clone();
        let reads = self.reads_rx.clone();
        crossbeam_channel::select! {
            recv(backfills) -> report => {
                if let Ok(report) = report {
                    self.handle_backfill(report);
                }
            }
            recv(reads) -> message => {
                if let Ok(message) = message {
                    self.handle_read(message);
                }
            }
            default(timeout) => {}
        }
    }

    fn handle_backfill(&mut self, report: BackfillReport) {
        if report.epoch != self.epoch || self.state != PlayerState::Seeking {
            trace!(context = "IterablePlayer", epoch = report.epoch, "Dropping stale backfill");
            return;
        }
        match report.result {
            Ok(messages) => {
                self.total_bytes_received += messages
                    .iter()
                    .map(|m| m.size_in_bytes as u64)
                    .sum::<u64>();
                debug!(
                    context = "IterablePlayer",
                    time = self.current_time,
                    messages = messages.len(),
                    "Backfill complete"
                );
                // A seek publishes only its backfill
                self.pending_messages = messages;
                if self.resume_playing {
                    if self.subscriptions_changed {
                        self.reopen_run();
                    }
                    self.enter_playing();
                    self.update_horizon();
                } else {
                    self.state = PlayerState::Paused;
                }
                self.emit();
            }
            Err(e) => self.fail(e.into_iteration()),
        }
    }

    fn handle_read(&mut self, message: ReadMessage) {
        if message.epoch != self.epoch {
            trace!(context = "IterablePlayer", epoch = message.epoch, "Dropping stale read");
            return;
        }
        match message.event {
            ReadEvent::Batch(batch) => {
                self.total_bytes_received += batch
                    .iter()
                    .map(|r| r.size_in_bytes() as u64)
                    .sum::<u64>();
                self.buffer.extend(batch);
            }
            ReadEvent::Done => self.buffer.finish(),
            ReadEvent::Failed(e) => self.fail(e.into_iteration()),
        }
    }

    fn fail(&mut self, e: PlaybackError) {
        error!(
            context = "IterablePlayer",
            error = %e,
            state = %self.state,
            "Playback failed"
        );
        self.epoch += 1;
        if let Some(mut run) = self.run.take() {
            run.cancel();
        }
        self.until = None;
        self.state = PlayerState::Errored;
        self.presence = Presence::Error;
        self.alerts
            .push(Alert::error("Playback stopped after a fatal error").with_error(&e));
        self.error = Some(e);
        self.emit();
    }

    fn build_snapshot(&self, messages: Vec<MessageEvent>) -> PlayerStateSnapshot {
        let active_data = self.init.as_ref().map(|init| ActiveData {
            start_time: init.start,
            end_time: init.end,
            current_time: self.current_time,
            is_playing: self.state == PlayerState::Playing,
            speed: self.speed,
            topics: init.topics.clone(),
            topic_stats: init.topic_stats.clone(),
            datatypes: init.datatypes.clone(),
            messages,
            last_seek_time: self.last_seek_time,
            total_bytes_received: self.total_bytes_received,
        });
        let (buffered_start, buffered_end) = self.buffer.range();
        PlayerStateSnapshot {
            presence: self.presence,
            state: self.state,
            active_data,
            alerts: self.alerts.clone(),
            name: self.init.as_ref().map(|i| i.name.clone()),
            progress: PlaybackProgress {
                buffered_start,
                buffered_end,
            },
        }
    }

    fn emit(&mut self) {
        let messages = std::mem::take(&mut self.pending_messages);
        let snapshot = self.build_snapshot(messages);
        self.last_emit = Some(self.clock.now());
        trace!(
            context = "IterablePlayer",
            state = %snapshot.state,
            messages = snapshot.messages().len(),
            "Publishing snapshot"
        );
        if let Some(listener) = self.listener.as_mut() {
            listener(&snapshot);
        }
    }
}

impl Drop for IterablePlayer {
    fn drop(&mut self) {
        self.cancel_run();
    }
}
