// SPDX-FileCopyrightText: 2026 ArcheBase
//
// SPDX-License-Identifier: MulanPSL-2.0

//! Player states and published snapshots.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::core::Time;
use crate::io::metadata::{Alert, MessageEvent, SchemaInfo, TopicInfo, TopicStats};

/// Internal state of the player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayerState {
    /// Created, source not yet initialized
    Idle,
    /// Source initialization in progress
    Initializing,
    /// Positioned, not advancing
    Paused,
    /// Advancing with the wall clock
    Playing,
    /// Backfill for a seek in flight
    Seeking,
    /// Closed by the caller
    Closed,
    /// Stopped by a fatal error
    Errored,
}

impl PlayerState {
    /// Whether no further transitions are possible.
    pub fn is_terminal(self) -> bool {
        matches!(self, PlayerState::Closed | PlayerState::Errored)
    }
}

impl fmt::Display for PlayerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PlayerState::Idle => "idle",
            PlayerState::Initializing => "initializing",
            PlayerState::Paused => "paused",
            PlayerState::Playing => "playing",
            PlayerState::Seeking => "seeking",
            PlayerState::Closed => "closed",
            PlayerState::Errored => "errored",
        };
        f.write_str(name)
    }
}

/// Availability of the data source, as shown to consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Presence {
    /// Source is being opened
    Initializing,
    /// Data is available
    Present,
    /// Source failed
    Error,
    /// Source connection is being re-established
    Reconnecting,
}

/// Range currently held in the read-ahead buffer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PlaybackProgress {
    /// Earliest buffered receive time
    pub buffered_start: Option<Time>,
    /// Latest buffered receive time
    pub buffered_end: Option<Time>,
}

/// Data describing an initialized source and the playback position.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActiveData {
    /// Start of the source's time range
    pub start_time: Time,
    /// End of the source's time range
    pub end_time: Time,
    /// Current playback position
    pub current_time: Time,
    /// Whether playback is advancing
    pub is_playing: bool,
    /// Playback speed multiplier
    pub speed: f64,
    /// Topics of the source
    pub topics: Vec<TopicInfo>,
    /// Per-topic statistics
    pub topic_stats: BTreeMap<String, TopicStats>,
    /// Schema definitions
    pub datatypes: BTreeMap<String, SchemaInfo>,
    /// Messages published with this snapshot
    pub messages: Vec<MessageEvent>,
    /// Target of the latest seek, if any
    pub last_seek_time: Option<Time>,
    /// Bytes of message data received from the source
    pub total_bytes_received: u64,
}

/// Complete player state published on every update.
///
/// Consumers replace their copy wholesale.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlayerStateSnapshot {
    /// Source availability
    pub presence: Presence,
    /// Internal player state
    pub state: PlayerState,
    /// Present once the source is initialized
    pub active_data: Option<ActiveData>,
    /// Accumulated alerts
    pub alerts: Vec<Alert>,
    /// Source display name
    pub name: Option<String>,
    /// Read-ahead progress
    pub progress: PlaybackProgress,
}

impl PlayerStateSnapshot {
    /// Messages carried by this snapshot.
    pub fn messages(&self) -> &[MessageEvent] {
        self.active_data
            .as_ref()
            .map(|d| d.messages.as_slice())
            .unwrap_or(&[])
    }

    /// Current playback time, once initialized.
    pub fn current_time(&self) -> Option<Time> {
        self.active_data.as_ref().map(|d| d.current_time)
    }
}
