// SPDX-FileCopyrightText: 2026 ArcheBase
//
// SPDX-License-Identifier: MulanPSL-2.0

//! Player configuration.
//!
//! Loadable from TOML; every field is optional and falls back to its
//! default.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::{PlaybackError, Result};

/// Tuning knobs for [`IterablePlayer`](super::IterablePlayer).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// How far ahead of the current time to keep buffered (default: 1000)
    pub read_ahead_duration_ms: u64,
    /// Batches that may be in flight between the reader and the player (default: 4)
    pub max_pending_reads: usize,
    /// Time budget for one batch read (default: 17)
    pub batch_budget_ms: u64,
    /// Minimum interval between snapshots while playing (default: 16)
    pub tick_interval_ms: u64,
    /// Largest wall-clock step applied in one tick (default: 300)
    pub max_tick_advance_ms: u64,
    /// Initial playback speed (default: 1.0)
    pub speed: f64,
    /// Message rate above which a topic is reported (default: 1000)
    pub high_frequency_threshold_hz: u64,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            read_ahead_duration_ms: 1000,
            max_pending_reads: 4,
            batch_budget_ms: 17,
            tick_interval_ms: 16,
            max_tick_advance_ms: 300,
            speed: 1.0,
            high_frequency_threshold_hz: 1000,
        }
    }
}

impl PlayerConfig {
    /// Parse a TOML document.
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)
            .map_err(|e| PlaybackError::parse("PlayerConfig", e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            PlaybackError::io("PlayerConfig", format!("{}: {e}", path.display()))
        })?;
        Self::from_toml(&text)
    }

    /// Serialize to TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| PlaybackError::Other(e.to_string()))
    }

    /// Set the initial playback speed.
    pub fn with_speed(mut self, speed: f64) -> Self {
        self.speed = speed;
        self
    }

    /// Set the read-ahead duration.
    pub fn with_read_ahead(mut self, duration: Duration) -> Self {
        self.read_ahead_duration_ms = duration.as_millis() as u64;
        self
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<()> {
        if !(self.speed.is_finite() && self.speed > 0.0) {
            return Err(PlaybackError::invalid_argument(format!(
                "speed must be positive and finite, got {}",
                self.speed
            )));
        }
        if self.max_pending_reads == 0 {
            return Err(PlaybackError::invalid_argument(
                "max_pending_reads must be at least 1",
            ));
        }
        Ok(())
    }

    pub(crate) fn read_ahead_nanos(&self) -> u64 {
        self.read_ahead_duration_ms.saturating_mul(1_000_000)
    }

    pub(crate) fn batch_budget(&self) -> Duration {
        Duration::from_millis(self.batch_budget_ms)
    }

    pub(crate) fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub(crate) fn max_tick_advance(&self) -> Duration {
        Duration::from_millis(self.max_tick_advance_ms)
    }
}
