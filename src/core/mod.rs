// SPDX-FileCopyrightText: 2026 ArcheBase
//
// SPDX-License-Identifier: MulanPSL-2.0

//! Core types used throughout roboplay.
//!
//! This module provides the foundational types for the library:
//! - [`PlaybackError`] - Error taxonomy shared by sources, workers and the player
//! - [`Time`] - Nanosecond timestamps and speed scaling helpers

pub mod error;
pub mod time;

pub use error::{PlaybackError, Result};
pub use time::Time;
