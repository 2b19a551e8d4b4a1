// SPDX-FileCopyrightText: 2026 ArcheBase
//
// SPDX-License-Identifier: MulanPSL-2.0

//! # Roboplay
//!
//! Iterable playback engine for robotics recordings.
//!
//! Turns a random-access recording (a local file, a remote URL, or several
//! consecutive files) into a time-ordered stream of messages for a player
//! loop, with backfill on seek, read-ahead buffering and worker isolation.
//!
//! ## Architecture
//!
//! - `io/formats/` - one [`IterableSource`] per format: MCAP, ROS1 bag,
//!   rosbag2 db3 and PX4 ULog
//! - `io/multi.rs` - combines several sources into one
//! - `io/cursor.rs` - pull-based cursors with batched and time-bounded reads
//! - `worker/` - runs a source on a dedicated thread behind requests
//! - `player/` - the playback state machine
//!
//! ## Example: Iterating a recording
//!
//! ```rust,no_run
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use roboplay::io::{open_source, InitArgs, MessageIteratorArgs, TopicFilter};
//!
//! let mut source = open_source(&InitArgs::File("file.mcap".into()))?;
//! let init = source.initialize()?;
//! println!("{} topics", init.topics.len());
//! for result in source.message_iterator(MessageIteratorArgs::forward(TopicFilter::All))? {
//!     if let Some(msg) = result?.as_message() {
//!         println!("{} @ {}", msg.topic, msg.receive_time);
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Example: Playback
//!
//! ```rust,no_run
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use roboplay::io::InitArgs;
//! use roboplay::player::{IterablePlayer, PlayerConfig};
//! use roboplay::worker::WorkerIterableSource;
//!
//! let source = WorkerIterableSource::with_thread_worker(InitArgs::File("file.bag".into()));
//! let mut player = IterablePlayer::new(Box::new(source), PlayerConfig::default());
//! player.set_subscriptions(["/imu", "/tf"]);
//! player.set_listener(|snapshot| println!("{} messages", snapshot.messages().len()));
//! player.initialize()?;
//! player.seek_playback(1_700_000_000_000_000_000)?;
//! player.settle()?;
//! # Ok(())
//! # }
//! ```

// Core types
pub mod core;

pub use core::{PlaybackError, Result, Time};

// Sources, iteration and dispatch
pub mod io;

pub use io::{
    open_source, Alert, AlertSeverity, FileFormat, InitArgs, Initialization, IterableSource,
    IteratorResult, MessageCursor, MessageEvent, MessageIteratorArgs, MessagePayload,
    MultiIterableSource, TopicFilter,
};

// Worker isolation
pub mod worker;

pub use worker::{InitWorker, ThreadWorker, WorkerIterableSource};

// Playback
pub mod player;

pub use player::{IterablePlayer, PlayerConfig, PlayerHandle, PlayerState, PlayerStateSnapshot};
