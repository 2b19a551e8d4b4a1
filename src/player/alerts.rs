// SPDX-FileCopyrightText: 2026 ArcheBase
//
// SPDX-License-Identifier: MulanPSL-2.0

//! Alerts raised by the player itself.

use std::collections::{HashMap, HashSet};

use crate::core::time::NANOS_PER_SEC;
use crate::core::Time;
use crate::io::metadata::Alert;

/// Detects topics whose receive-time rate exceeds a threshold.
///
/// Rates are counted in one-second windows of receive time, so results do
/// not depend on playback speed. Each topic is reported at most once.
#[derive(Debug)]
pub struct HighFrequencyDetector {
    threshold_hz: u64,
    windows: HashMap<String, (Time, u64)>,
    reported: HashSet<String>,
}

impl HighFrequencyDetector {
    /// Report topics with more than `threshold_hz` messages in a second.
    pub fn new(threshold_hz: u64) -> Self {
        Self {
            threshold_hz,
            windows: HashMap::new(),
            reported: HashSet::new(),
        }
    }

    /// Count a message; returns an alert the first time `topic` goes over.
    pub fn observe(&mut self, topic: &str, time: Time) -> Option<Alert> {
        if self.threshold_hz == 0 || self.reported.contains(topic) {
            return None;
        }
        let window = self
            .windows
            .entry(topic.to_string())
            .or_insert((time, 0));
        if time < window.0 || time - window.0 >= NANOS_PER_SEC {
            *window = (time, 0);
        }
        window.1 += 1;
        if window.1 <= self.threshold_hz {
            return None;
        }

        self.windows.remove(topic);
        self.reported.insert(topic.to_string());
        Some(
            Alert::warn(format!(
                "Topic {topic} has a message rate above {} Hz",
                self.threshold_hz
            ))
            .with_tip("High-frequency topics can slow down playback; unsubscribe if not needed."),
        )
    }

    /// Forget window counts, keeping the set of reported topics.
    pub fn reset_windows(&mut self) {
        self.windows.clear();
    }
}
