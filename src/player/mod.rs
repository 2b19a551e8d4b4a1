// SPDX-FileCopyrightText: 2026 ArcheBase
//
// SPDX-License-Identifier: MulanPSL-2.0

//! Playback of an [`IterableSource`](crate::io::IterableSource).
//!
//! [`IterablePlayer`] is the state machine (`Idle → Initializing → Paused ⇄
//! Playing`, transient `Seeking`, terminal `Closed`/`Errored`).
//! [`PlayerHandle`] runs one on its own thread behind a command channel.

pub mod alerts;
pub mod clock;
pub mod config;
pub mod handle;
pub mod iterable;
pub mod read_ahead;
pub mod state;

pub use alerts::HighFrequencyDetector;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::PlayerConfig;
pub use handle::{PlayerCommand, PlayerHandle};
pub use iterable::{IterablePlayer, StateListener};
pub use state::{ActiveData, PlaybackProgress, PlayerState, PlayerStateSnapshot, Presence};
