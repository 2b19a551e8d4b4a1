// SPDX-FileCopyrightText: 2026 ArcheBase
//
// SPDX-License-Identifier: MulanPSL-2.0

//! Playback state machine over real recordings.
//!
//! Run with: cargo test --test player_tests

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use common::{Format, SCENARIO};
use roboplay::io::{
    open_source, AlertSeverity, GetBackfillMessagesArgs, InitArgs, Initialization,
    IterableSource, MessageEvent, MessageIterator, MessageIteratorArgs,
};
use roboplay::player::{
    IterablePlayer, ManualClock, PlayerConfig, PlayerHandle, PlayerState, PlayerStateSnapshot,
    Presence,
};
use roboplay::{PlaybackError, Result, Time, WorkerIterableSource};

/// Snapshots published by a player.
#[derive(Clone, Default)]
struct Recorder(Arc<Mutex<Vec<PlayerStateSnapshot>>>);

impl Recorder {
    fn attach(&self, player: &mut IterablePlayer) {
        let snapshots = self.0.clone();
        player.set_listener(move |snapshot| snapshots.lock().unwrap().push(snapshot.clone()));
    }

    fn take(&self) -> Vec<PlayerStateSnapshot> {
        std::mem::take(&mut *self.0.lock().unwrap())
    }

    fn len(&self) -> usize {
        self.0.lock().unwrap().len()
    }
}

/// Every message delivered across `snapshots`, in delivery order.
fn delivered(snapshots: &[PlayerStateSnapshot]) -> Vec<(String, Time)> {
    snapshots
        .iter()
        .flat_map(|s| s.messages())
        .map(|m| (m.topic.clone(), m.receive_time))
        .collect()
}

fn scenario_player(
    dir: &tempfile::TempDir,
    config: PlayerConfig,
) -> (IterablePlayer, Recorder) {
    let path = Format::Mcap.write(dir.path(), "scenario", SCENARIO);
    let source = open_source(&InitArgs::File(path)).unwrap();
    let mut player = IterablePlayer::new(source, config);
    let recorder = Recorder::default();
    recorder.attach(&mut player);
    (player, recorder)
}

/// Source that initializes but fails every read.
struct UnreadableSource;

impl IterableSource for UnreadableSource {
    fn initialize(&mut self) -> Result<Initialization> {
        let mut init = Initialization::new("unreadable");
        init.end = 10;
        Ok(init)
    }

    fn message_iterator(&self, _args: MessageIteratorArgs) -> Result<Box<dyn MessageIterator>> {
        Err(PlaybackError::iteration("disk unavailable"))
    }

    fn terminate(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Source whose reads panic. With `backfill` set, backfills still succeed so
/// only the read-ahead thread panics.
struct PanickingSource {
    backfill: bool,
}

impl IterableSource for PanickingSource {
    fn initialize(&mut self) -> Result<Initialization> {
        let mut init = Initialization::new("panicking");
        init.end = 10;
        Ok(init)
    }

    fn message_iterator(&self, _args: MessageIteratorArgs) -> Result<Box<dyn MessageIterator>> {
        panic!("decoder bug");
    }

    fn get_backfill_messages(&self, args: GetBackfillMessagesArgs) -> Result<Vec<MessageEvent>> {
        if self.backfill {
            Ok(Vec::new())
        } else {
            roboplay::io::traits::backfill_from_reverse_iterator(self, args)
        }
    }

    fn terminate(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Wraps a source and counts the iterators opened on it.
struct CountingSource {
    inner: Box<dyn IterableSource>,
    opened: Arc<AtomicUsize>,
}

impl IterableSource for CountingSource {
    fn initialize(&mut self) -> Result<Initialization> {
        self.inner.initialize()
    }

    fn message_iterator(&self, args: MessageIteratorArgs) -> Result<Box<dyn MessageIterator>> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        self.inner.message_iterator(args)
    }

    fn get_backfill_messages(&self, args: GetBackfillMessagesArgs) -> Result<Vec<MessageEvent>> {
        self.inner.get_backfill_messages(args)
    }

    fn terminate(&mut self) -> Result<()> {
        self.inner.terminate()
    }
}

#[test]
fn test_seek_backfills_then_play_until_delivers_the_gap() {
    let dir = tempfile::tempdir().unwrap();
    let (mut player, recorder) = scenario_player(&dir, PlayerConfig::default());
    player.set_subscriptions(["/a", "/b"]);
    player.initialize().unwrap();
    player.settle().unwrap();
    assert_eq!(player.state(), PlayerState::Paused);
    assert_eq!(delivered(&recorder.take()), common::pairs(&[("/a", 0)]));

    player.seek_playback(6).unwrap();
    player.settle().unwrap();
    let snapshots = recorder.take();
    assert_eq!(snapshots[0].state, PlayerState::Seeking);
    assert_eq!(delivered(&snapshots), common::pairs(&[("/b", 2), ("/a", 5)]));
    let last = snapshots.last().unwrap();
    assert_eq!(last.state, PlayerState::Paused);
    let active = last.active_data.as_ref().unwrap();
    assert_eq!(active.current_time, 6);
    assert_eq!(active.last_seek_time, Some(6));
    assert!(!active.is_playing);

    player.play_until(9).unwrap();
    player.settle().unwrap();
    let snapshots = recorder.take();
    assert_eq!(delivered(&snapshots), common::pairs(&[("/b", 8)]));
    assert_eq!(player.current_time(), 9);
    assert_eq!(player.state(), PlayerState::Paused);
    assert_eq!(snapshots.last().unwrap().current_time(), Some(9));
}

#[test]
fn test_play_until_past_end_stops_at_end() {
    let dir = tempfile::tempdir().unwrap();
    let (mut player, recorder) = scenario_player(&dir, PlayerConfig::default());
    player.set_subscriptions(["/a"]);
    player.initialize().unwrap();
    player.settle().unwrap();
    recorder.take();

    player.play_until(1_000).unwrap();
    player.settle().unwrap();
    assert_eq!(
        delivered(&recorder.take()),
        common::pairs(&[("/a", 5), ("/a", 10)])
    );
    assert_eq!(player.current_time(), 10);
    assert_eq!(player.state(), PlayerState::Paused);
}

#[test]
fn test_play_until_before_current_time_pauses() {
    let dir = tempfile::tempdir().unwrap();
    let (mut player, recorder) = scenario_player(&dir, PlayerConfig::default());
    player.set_subscriptions(["/a", "/b"]);
    player.initialize().unwrap();
    player.seek_playback(6).unwrap();
    player.settle().unwrap();
    recorder.take();

    player.play_until(3).unwrap();
    player.settle().unwrap();
    assert!(delivered(&recorder.take()).is_empty());
    assert_eq!(player.current_time(), 6);
    assert_eq!(player.state(), PlayerState::Paused);
}

#[test]
fn test_newer_seek_supersedes_pending_one() {
    let dir = tempfile::tempdir().unwrap();
    let (mut player, recorder) = scenario_player(&dir, PlayerConfig::default());
    player.set_subscriptions(["/a", "/b"]);
    player.initialize().unwrap();
    player.settle().unwrap();
    recorder.take();

    player.seek_playback(3).unwrap();
    player.seek_playback(7).unwrap();
    player.settle().unwrap();

    // Backfill at 3 would carry /a@0; only the one at 7 is published
    assert_eq!(
        delivered(&recorder.take()),
        common::pairs(&[("/b", 2), ("/a", 5)])
    );
    assert_eq!(player.current_time(), 7);
}

#[test]
fn test_seek_is_clamped_to_range() {
    let dir = tempfile::tempdir().unwrap();
    let (mut player, _recorder) = scenario_player(&dir, PlayerConfig::default());
    player.initialize().unwrap();
    player.seek_playback(500).unwrap();
    player.settle().unwrap();
    assert_eq!(player.current_time(), 10);
}

#[test]
fn test_subscription_change_reads_from_current_time() {
    let dir = tempfile::tempdir().unwrap();
    let (mut player, recorder) = scenario_player(&dir, PlayerConfig::default());
    player.set_subscriptions(["/a"]);
    player.initialize().unwrap();
    player.settle().unwrap();
    player.play_until(6).unwrap();
    player.settle().unwrap();
    assert_eq!(
        delivered(&recorder.take()),
        common::pairs(&[("/a", 0), ("/a", 5)])
    );

    player.set_subscriptions(["/b", "/a", "/b"]);
    assert_eq!(player.subscriptions().to_vec(), vec!["/a".to_string(), "/b".to_string()]);
    player.play_until(9).unwrap();
    player.settle().unwrap();
    // /b@2 lies behind the playback time and is not replayed
    assert_eq!(delivered(&recorder.take()), common::pairs(&[("/b", 8)]));
}

#[test]
fn test_real_time_playback_delivers_each_message_once() {
    let dir = tempfile::tempdir().unwrap();
    let clock = Arc::new(ManualClock::new());
    let path = Format::Bag.write(dir.path(), "scenario", SCENARIO);
    let source = open_source(&InitArgs::File(path)).unwrap();
    let mut player =
        IterablePlayer::new(source, PlayerConfig::default()).with_clock(clock.clone());
    let recorder = Recorder::default();
    recorder.attach(&mut player);

    player.set_subscriptions(["/a", "/b"]);
    player.initialize().unwrap();
    player.settle().unwrap();
    player.start_playback().unwrap();
    assert_eq!(player.state(), PlayerState::Playing);

    let deadline = Instant::now() + Duration::from_secs(10);
    while player.state() == PlayerState::Playing {
        assert!(Instant::now() < deadline, "Playback did not reach the end");
        clock.advance(Duration::from_nanos(3));
        player.tick();
        std::thread::sleep(Duration::from_millis(1));
    }

    assert_eq!(player.state(), PlayerState::Paused);
    assert_eq!(player.current_time(), 10);
    assert_eq!(
        delivered(&recorder.take()),
        common::pairs(&[("/a", 0), ("/b", 2), ("/a", 5), ("/b", 8), ("/a", 10)])
    );
}

#[test]
fn test_pause_and_start_are_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let clock = Arc::new(ManualClock::new());
    let (player, recorder) = scenario_player(&dir, PlayerConfig::default());
    let mut player = player.with_clock(clock);
    player.initialize().unwrap();
    player.settle().unwrap();
    recorder.take();

    player.pause_playback().unwrap();
    assert_eq!(recorder.len(), 0);

    player.start_playback().unwrap();
    player.start_playback().unwrap();
    assert_eq!(recorder.len(), 1);
    assert_eq!(player.state(), PlayerState::Playing);

    player.pause_playback().unwrap();
    player.pause_playback().unwrap();
    let snapshots = recorder.take();
    assert_eq!(snapshots.len(), 2);
    assert_eq!(snapshots[1].state, PlayerState::Paused);
}

#[test]
fn test_seek_discards_pending_play_until() {
    let dir = tempfile::tempdir().unwrap();
    let clock = Arc::new(ManualClock::new());
    let (player, recorder) = scenario_player(&dir, PlayerConfig::default());
    let mut player = player.with_clock(clock);
    player.set_subscriptions(["/a", "/b"]);
    player.initialize().unwrap();
    player.settle().unwrap();
    recorder.take();

    player.play_until(10).unwrap();
    player.seek_playback(3).unwrap();
    player.settle().unwrap();
    for _ in 0..5 {
        std::thread::sleep(Duration::from_millis(10));
        player.tick();
    }
    player.pause_playback().unwrap();

    // Only the backfill at 3 arrives; nothing read for the play-until leaks through
    assert_eq!(
        delivered(&recorder.take()),
        common::pairs(&[("/a", 0), ("/b", 2)])
    );
    assert_eq!(player.current_time(), 3);
}

#[test]
fn test_pause_keeps_read_ahead() {
    let dir = tempfile::tempdir().unwrap();
    let clock = Arc::new(ManualClock::new());
    let opened = Arc::new(AtomicUsize::new(0));
    let path = Format::Mcap.write(dir.path(), "scenario", SCENARIO);
    let source = CountingSource {
        inner: open_source(&InitArgs::File(path)).unwrap(),
        opened: opened.clone(),
    };
    let mut player =
        IterablePlayer::new(Box::new(source), PlayerConfig::default()).with_clock(clock);
    let recorder = Recorder::default();
    recorder.attach(&mut player);
    player.set_subscriptions(["/a", "/b"]);
    player.initialize().unwrap();
    player.settle().unwrap();

    let deadline = Instant::now() + Duration::from_secs(10);
    while player.snapshot().progress.buffered_end != Some(10) {
        assert!(Instant::now() < deadline, "Read-ahead did not fill");
        std::thread::sleep(Duration::from_millis(1));
        player.tick();
    }
    let buffered = player.snapshot().progress;
    let reads = opened.load(Ordering::SeqCst);

    player.start_playback().unwrap();
    player.pause_playback().unwrap();
    player.start_playback().unwrap();
    player.pause_playback().unwrap();
    assert_eq!(player.snapshot().progress, buffered);

    recorder.take();
    player.play_until(9).unwrap();
    player.settle().unwrap();
    assert_eq!(delivered(&recorder.take()), common::pairs(&[("/b", 2), ("/a", 5), ("/b", 8)]));
    assert_eq!(opened.load(Ordering::SeqCst), reads);
}

#[test]
fn test_playback_speed_validation() {
    let dir = tempfile::tempdir().unwrap();
    let (mut player, recorder) = scenario_player(&dir, PlayerConfig::default());
    player.initialize().unwrap();
    player.settle().unwrap();

    for bad in [0.0, -1.0, f64::NAN, f64::INFINITY] {
        assert!(matches!(
            player.set_playback_speed(bad),
            Err(PlaybackError::InvalidArgument { .. })
        ));
    }
    assert_eq!(player.speed(), 1.0);

    recorder.take();
    player.set_playback_speed(2.5).unwrap();
    let snapshots = recorder.take();
    assert_eq!(snapshots.last().unwrap().active_data.as_ref().unwrap().speed, 2.5);
}

#[test]
fn test_speed_from_config() {
    let config = PlayerConfig::from_toml("speed = 0.5\nread_ahead_duration_ms = 250\n").unwrap();
    let dir = tempfile::tempdir().unwrap();
    let (player, _recorder) = scenario_player(&dir, config);
    assert_eq!(player.speed(), 0.5);
}

#[test]
fn test_commands_require_initialization() {
    let dir = tempfile::tempdir().unwrap();
    let (mut player, _recorder) = scenario_player(&dir, PlayerConfig::default());
    assert_eq!(player.state(), PlayerState::Idle);
    assert!(player.start_playback().is_err());
    assert!(player.seek_playback(1).is_err());

    player.initialize().unwrap();
    assert!(player.initialize().is_err());
}

#[test]
fn test_initialization_failure_errors_player() {
    let dir = tempfile::tempdir().unwrap();
    let source = open_source(&InitArgs::File(dir.path().join("missing.mcap"))).unwrap();
    let mut player = IterablePlayer::new(source, PlayerConfig::default());
    let recorder = Recorder::default();
    recorder.attach(&mut player);

    assert!(matches!(
        player.initialize(),
        Err(PlaybackError::Initialization { .. })
    ));
    assert_eq!(player.state(), PlayerState::Errored);
    let last = recorder.take().pop().unwrap();
    assert_eq!(last.presence, Presence::Error);
    assert!(last
        .alerts
        .iter()
        .any(|a| a.severity == AlertSeverity::Error));
}

#[test]
fn test_read_failure_errors_player() {
    let mut player = IterablePlayer::new(Box::new(UnreadableSource), PlayerConfig::default());
    let recorder = Recorder::default();
    recorder.attach(&mut player);
    player.set_subscriptions(["/a"]);
    player.initialize().unwrap();

    assert!(matches!(
        player.settle(),
        Err(PlaybackError::Iteration { .. })
    ));
    assert_eq!(player.state(), PlayerState::Errored);
    assert!(matches!(player.error(), Some(PlaybackError::Iteration { .. })));
    assert_eq!(recorder.take().pop().unwrap().presence, Presence::Error);

    // Errored players refuse commands but can still be closed
    assert!(player.start_playback().is_err());
    assert!(player.seek_playback(2).is_err());
    player.close().unwrap();
    assert_eq!(player.state(), PlayerState::Closed);
}

#[test]
fn test_reader_panic_errors_player() {
    let mut player = IterablePlayer::new(
        Box::new(PanickingSource { backfill: true }),
        PlayerConfig::default(),
    );
    let recorder = Recorder::default();
    recorder.attach(&mut player);
    player.set_subscriptions(["/a"]);
    player.initialize().unwrap();

    // The reader may fail before or after the seek lands
    let _ = player.settle();
    if player.state() != PlayerState::Errored {
        player.play_until(9).unwrap();
        assert!(matches!(
            player.settle(),
            Err(PlaybackError::Iteration { .. })
        ));
    }
    assert_eq!(player.state(), PlayerState::Errored);
    assert!(player.error().unwrap().to_string().contains("panicked"));
    let last = recorder.take().pop().unwrap();
    assert_eq!(last.presence, Presence::Error);
    assert!(last.alerts.iter().any(|a| a.severity == AlertSeverity::Error));
    player.close().unwrap();
}

#[test]
fn test_backfill_panic_errors_player() {
    let mut player = IterablePlayer::new(
        Box::new(PanickingSource { backfill: false }),
        PlayerConfig::default(),
    );
    player.set_subscriptions(["/a"]);
    player.initialize().unwrap();
    assert!(matches!(
        player.settle(),
        Err(PlaybackError::Iteration { .. })
    ));
    assert_eq!(player.state(), PlayerState::Errored);
}

#[test]
fn test_high_frequency_topics_raise_alert() {
    let dir = tempfile::tempdir().unwrap();
    let config = PlayerConfig {
        high_frequency_threshold_hz: 1,
        ..PlayerConfig::default()
    };
    let (mut player, recorder) = scenario_player(&dir, config);
    player.set_subscriptions(["/a"]);
    player.initialize().unwrap();
    player.settle().unwrap();
    player.play_until(10).unwrap();
    player.settle().unwrap();

    let last = recorder.take().pop().unwrap();
    let warnings: Vec<_> = last
        .alerts
        .iter()
        .filter(|a| a.severity == AlertSeverity::Warn && a.message.contains("/a"))
        .collect();
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].tip.is_some());
}

#[test]
fn test_close_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let (mut player, recorder) = scenario_player(&dir, PlayerConfig::default());
    player.initialize().unwrap();
    player.settle().unwrap();
    player.start_playback().unwrap();

    player.close().unwrap();
    player.close().unwrap();
    assert_eq!(player.state(), PlayerState::Closed);
    assert_eq!(
        recorder
            .take()
            .iter()
            .filter(|s| s.state == PlayerState::Closed)
            .count(),
        1
    );
    assert!(matches!(player.start_playback(), Err(PlaybackError::Closed)));
}

#[test]
fn test_player_over_worker_source() {
    let dir = tempfile::tempdir().unwrap();
    let path = Format::Db3.write(dir.path(), "scenario", SCENARIO);
    let source = WorkerIterableSource::with_thread_worker(InitArgs::File(path));
    let mut player = IterablePlayer::new(Box::new(source), PlayerConfig::default());
    let recorder = Recorder::default();
    recorder.attach(&mut player);

    player.set_subscriptions(["/a", "/b"]);
    player.initialize().unwrap();
    player.seek_playback(6).unwrap();
    player.settle().unwrap();
    recorder.take();
    player.play_until(9).unwrap();
    player.settle().unwrap();
    assert_eq!(delivered(&recorder.take()), common::pairs(&[("/b", 8)]));
    player.close().unwrap();
}

#[test]
fn test_player_handle_runs_commands() {
    let dir = tempfile::tempdir().unwrap();
    let path = Format::Mcap.write(dir.path(), "scenario", SCENARIO);
    let source = open_source(&InitArgs::File(path)).unwrap();
    let player = IterablePlayer::new(source, PlayerConfig::default());
    let (tx, rx) = crossbeam_channel::unbounded::<PlayerStateSnapshot>();
    let mut handle = PlayerHandle::spawn(player, move |snapshot| {
        let _ = tx.send(snapshot.clone());
    })
    .unwrap();

    let wait_for = |pred: &dyn Fn(&PlayerStateSnapshot) -> bool| -> Vec<PlayerStateSnapshot> {
        let deadline = Instant::now() + Duration::from_secs(10);
        let mut seen = Vec::new();
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let snapshot = rx.recv_timeout(remaining).expect("Timed out waiting for player");
            let done = pred(&snapshot);
            seen.push(snapshot);
            if done {
                return seen;
            }
        }
    };

    handle.subscribe(["/a", "/b"]).unwrap();
    handle.seek_playback(6).unwrap();
    let seen = wait_for(&|s| {
        s.state == PlayerState::Paused
            && s.active_data.as_ref().and_then(|a| a.last_seek_time) == Some(6)
    });
    let backfill = seen.last().unwrap().messages();
    assert_eq!(backfill.len(), 2);

    handle.play_until(9).unwrap();
    let seen = wait_for(&|s| s.state == PlayerState::Paused && s.current_time() == Some(9));
    assert_eq!(delivered(&seen), common::pairs(&[("/b", 8)]));

    assert!(handle.set_playback_speed(-2.0).is_err());
    handle.close();
    handle.close();
    assert!(handle.start_playback().is_err());
}
