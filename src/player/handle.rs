// SPDX-FileCopyrightText: 2026 ArcheBase
//
// SPDX-License-Identifier: MulanPSL-2.0

//! Runs a player on its own thread behind a command channel.

use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{RecvTimeoutError, Sender};
use tracing::{debug, warn};

use crate::core::{PlaybackError, Result, Time};

use super::iterable::IterablePlayer;
use super::state::{PlayerState, PlayerStateSnapshot};

/// Poll interval while the player has nothing scheduled.
const IDLE_POLL: Duration = Duration::from_millis(50);

/// Command for a player thread.
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerCommand {
    /// Replace subscriptions
    Subscribe(Vec<String>),
    /// Change playback speed
    SetPlaybackSpeed(f64),
    /// Start playback
    StartPlayback,
    /// Pause playback
    PausePlayback,
    /// Seek to a time
    SeekPlayback(Time),
    /// Play until a time, then pause
    PlayUntil(Time),
    /// Close the player and stop the thread
    Close,
}

/// Drop every seek that is immediately followed by another seek.
pub fn coalesce_seeks(commands: Vec<PlayerCommand>) -> Vec<PlayerCommand> {
    let mut out: Vec<PlayerCommand> = Vec::with_capacity(commands.len());
    for command in commands {
        if matches!(command, PlayerCommand::SeekPlayback(_))
            && matches!(out.last(), Some(PlayerCommand::SeekPlayback(_)))
        {
            out.pop();
        }
        out.push(command);
    }
    out
}

/// Handle to a player running on a dedicated thread.
///
/// Commands are applied in order; state changes are delivered to the
/// callback given to [`PlayerHandle::spawn`]. Dropping the handle closes the
/// player.
pub struct PlayerHandle {
    commands: Sender<PlayerCommand>,
    thread: Option<JoinHandle<()>>,
}

impl PlayerHandle {
    /// Initialize `player` on a new thread and serve commands.
    pub fn spawn<F>(mut player: IterablePlayer, on_state_change: F) -> Result<Self>
    where
        F: FnMut(&PlayerStateSnapshot) + Send + 'static,
    {
        let (commands, receiver) = crossbeam_channel::unbounded::<PlayerCommand>();
        player.set_listener(on_state_change);

        let thread = std::thread::Builder::new()
            .name("roboplay-player".to_string())
            .spawn(move || {
                if let Err(e) = player.initialize() {
                    warn!(context = "PlayerHandle", error = %e, "Initialization failed");
                }
                loop {
                    let timeout = player.next_wakeup().unwrap_or(IDLE_POLL);
                    match receiver.recv_timeout(timeout) {
                        Ok(first) => {
                            let mut batch = vec![first];
                            batch.extend(receiver.try_iter());
                            for command in coalesce_seeks(batch) {
                                apply(&mut player, command);
                            }
                        }
                        Err(RecvTimeoutError::Timeout) => {}
                        Err(RecvTimeoutError::Disconnected) => {
                            let _ = player.close();
                        }
                    }
                    player.tick();
                    if player.state() == PlayerState::Closed {
                        break;
                    }
                }
                debug!(context = "PlayerHandle", "Player thread finished");
            })
            .map_err(|e| PlaybackError::Other(format!("Failed to spawn player thread: {e}")))?;

        Ok(Self {
            commands,
            thread: Some(thread),
        })
    }

    fn send(&self, command: PlayerCommand) -> Result<()> {
        self.commands.send(command).map_err(|_| PlaybackError::Closed)
    }

    /// Replace subscriptions.
    pub fn subscribe<I, S>(&self, topics: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.send(PlayerCommand::Subscribe(
            topics.into_iter().map(Into::into).collect(),
        ))
    }

    /// Change playback speed. Must be positive and finite.
    pub fn set_playback_speed(&self, speed: f64) -> Result<()> {
        if !(speed.is_finite() && speed > 0.0) {
            return Err(PlaybackError::invalid_argument(format!(
                "Playback speed must be positive and finite, got {speed}"
            )));
        }
        self.send(PlayerCommand::SetPlaybackSpeed(speed))
    }

    /// Start playback.
    pub fn start_playback(&self) -> Result<()> {
        self.send(PlayerCommand::StartPlayback)
    }

    /// Pause playback.
    pub fn pause_playback(&self) -> Result<()> {
        self.send(PlayerCommand::PausePlayback)
    }

    /// Seek to `time`.
    pub fn seek_playback(&self, time: Time) -> Result<()> {
        self.send(PlayerCommand::SeekPlayback(time))
    }

    /// Play until `time`, then pause.
    pub fn play_until(&self, time: Time) -> Result<()> {
        self.send(PlayerCommand::PlayUntil(time))
    }

    /// Close the player and wait for its thread. Idempotent.
    pub fn close(&mut self) {
        let _ = self.commands.send(PlayerCommand::Close);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!(context = "PlayerHandle", "Player thread panicked");
            }
        }
    }
}

impl Drop for PlayerHandle {
    fn drop(&mut self) {
        self.close();
    }
}

fn apply(player: &mut IterablePlayer, command: PlayerCommand) {
    let result = match &command {
        PlayerCommand::Subscribe(topics) => {
            player.set_subscriptions(topics.iter().cloned());
            Ok(())
        }
        PlayerCommand::SetPlaybackSpeed(speed) => player.set_playback_speed(*speed),
        PlayerCommand::StartPlayback => player.start_playback(),
        PlayerCommand::PausePlayback => player.pause_playback(),
        PlayerCommand::SeekPlayback(time) => player.seek_playback(*time),
        PlayerCommand::PlayUntil(time) => player.play_until(*time),
        PlayerCommand::Close => player.close(),
    };
    if let Err(e) = result {
        warn!(
            context = "PlayerHandle",
            command = ?command,
            error = %e,
            "Command failed"
        );
    }
}
