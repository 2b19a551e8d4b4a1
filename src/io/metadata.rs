// SPDX-FileCopyrightText: 2026 ArcheBase
//
// SPDX-License-Identifier: MulanPSL-2.0

//! Shared metadata types for all recording formats.
//!
//! This module provides the format-independent vocabulary exchanged between
//! sources, cursors and the player: the initialization summary, message
//! events, iterator results and alerts.

use std::collections::BTreeMap;

use bytes::Bytes;
use serde::Serialize;

use crate::core::Time;

/// Summary of a topic in a recording.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct TopicInfo {
    /// Topic name (e.g., "/joint_states", "/tf")
    pub name: String,
    /// Schema (datatype) name (e.g., "sensor_msgs/msg/JointState")
    pub schema_name: String,
}

impl TopicInfo {
    /// Create a new TopicInfo.
    pub fn new(name: impl Into<String>, schema_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            schema_name: schema_name.into(),
        }
    }
}

/// Per-topic statistics gathered while indexing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TopicStats {
    /// Number of messages on the topic
    pub num_messages: u64,
    /// Receive time of the first message, when known
    pub first_message_time: Option<Time>,
    /// Receive time of the last message, when known
    pub last_message_time: Option<Time>,
}

impl TopicStats {
    /// Account for one message received at `time`.
    pub fn record(&mut self, time: Time) {
        self.num_messages += 1;
        self.first_message_time = Some(self.first_message_time.map_or(time, |t| t.min(time)));
        self.last_message_time = Some(self.last_message_time.map_or(time, |t| t.max(time)));
    }

    /// Fold another set of statistics for the same topic into this one.
    pub fn merge(&mut self, other: &TopicStats) {
        self.num_messages += other.num_messages;
        self.first_message_time = match (self.first_message_time, other.first_message_time) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        self.last_message_time = match (self.last_message_time, other.last_message_time) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
    }
}

/// Schema definition attached to a datatype name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SchemaInfo {
    /// Schema encoding (e.g., "ros1msg", "ros2msg", "jsonschema", "ulog")
    pub encoding: String,
    /// Schema definition text, when available as text
    pub definition: Option<String>,
}

/// Severity of an [`Alert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    /// Informational
    Info,
    /// Degraded but playable
    Warn,
    /// Data lost or playback stopped
    Error,
}

/// A non-fatal problem report attached to a connection, topic or source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Alert {
    /// Severity
    pub severity: AlertSeverity,
    /// Short message
    pub message: String,
    /// Optional hint for the user
    pub tip: Option<String>,
    /// Underlying error text, if the alert wraps one
    pub error: Option<String>,
}

impl Alert {
    fn with_severity(severity: AlertSeverity, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
            tip: None,
            error: None,
        }
    }

    /// Create an informational alert.
    pub fn info(message: impl Into<String>) -> Self {
        Self::with_severity(AlertSeverity::Info, message)
    }

    /// Create a warning alert.
    pub fn warn(message: impl Into<String>) -> Self {
        Self::with_severity(AlertSeverity::Warn, message)
    }

    /// Create an error alert.
    pub fn error(message: impl Into<String>) -> Self {
        Self::with_severity(AlertSeverity::Error, message)
    }

    /// Set the tip.
    pub fn with_tip(mut self, tip: impl Into<String>) -> Self {
        self.tip = Some(tip.into());
        self
    }

    /// Attach the text of an underlying error.
    pub fn with_error(mut self, error: impl std::fmt::Display) -> Self {
        self.error = Some(error.to_string());
        self
    }
}

/// Result of initializing a source.
///
/// Produced once per source and immutable afterwards.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Initialization {
    /// Display name (file name, URL, or combined name)
    pub name: String,
    /// Earliest receive time in the source
    pub start: Time,
    /// Latest receive time in the source
    pub end: Time,
    /// Topics, sorted by name
    pub topics: Vec<TopicInfo>,
    /// Per-topic statistics keyed by topic name
    pub topic_stats: BTreeMap<String, TopicStats>,
    /// Schema definitions keyed by schema name
    pub datatypes: BTreeMap<String, SchemaInfo>,
    /// Free-form metadata (library, profile, ULog info fields, ...)
    pub metadata: BTreeMap<String, String>,
    /// Recording profile (e.g., "ros1", "ros2", "px4")
    pub profile: Option<String>,
    /// Non-fatal problems discovered while indexing
    pub alerts: Vec<Alert>,
}

impl Initialization {
    /// Create an empty initialization result.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Add a topic unless one with the same name already exists.
    ///
    /// Returns false when the topic was already present with a different
    /// schema name.
    pub fn add_topic(&mut self, topic: TopicInfo) -> bool {
        match self.topics.iter().find(|t| t.name == topic.name) {
            Some(existing) => existing.schema_name == topic.schema_name,
            None => {
                self.topics.push(topic);
                true
            }
        }
    }

    /// Check if the source has a topic.
    pub fn has_topic(&self, name: &str) -> bool {
        self.topics.iter().any(|t| t.name == name)
    }

    /// Schema name of a topic.
    pub fn schema_name(&self, topic: &str) -> Option<&str> {
        self.topics
            .iter()
            .find(|t| t.name == topic)
            .map(|t| t.schema_name.as_str())
    }

    /// Total number of messages across all topics.
    pub fn message_count(&self) -> u64 {
        self.topic_stats.values().map(|s| s.num_messages).sum()
    }

    /// Duration in nanoseconds.
    pub fn duration(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    /// Sort topics by name and derive the time range from the topic stats
    /// when it has not been set.
    pub fn finish(mut self) -> Self {
        self.topics.sort();
        if self.start == 0 && self.end == 0 {
            let firsts = self.topic_stats.values().filter_map(|s| s.first_message_time);
            let lasts = self.topic_stats.values().filter_map(|s| s.last_message_time);
            self.start = firsts.min().unwrap_or(0);
            self.end = lasts.max().unwrap_or(self.start);
        }
        self
    }
}

/// Message payload as delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MessagePayload {
    /// Undecoded message bytes, shared without copying
    Raw(Bytes),
    /// Message decoded into a structured value
    Decoded(serde_json::Value),
}

impl MessagePayload {
    /// Raw bytes, if the payload is undecoded.
    pub fn as_raw(&self) -> Option<&Bytes> {
        match self {
            MessagePayload::Raw(b) => Some(b),
            MessagePayload::Decoded(_) => None,
        }
    }

    /// Decoded value, if the payload was decoded.
    pub fn as_decoded(&self) -> Option<&serde_json::Value> {
        match self {
            MessagePayload::Raw(_) => None,
            MessagePayload::Decoded(v) => Some(v),
        }
    }
}

/// A single message read from a source.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessageEvent {
    /// Topic name
    pub topic: String,
    /// Schema (datatype) name
    pub schema_name: String,
    /// Receive (log) time
    pub receive_time: Time,
    /// Publish time, when the format records one
    pub publish_time: Option<Time>,
    /// Message payload
    pub message: MessagePayload,
    /// Size of the serialized message in bytes
    pub size_in_bytes: usize,
}

impl MessageEvent {
    /// Create a message event carrying raw bytes.
    pub fn raw(
        topic: impl Into<String>,
        schema_name: impl Into<String>,
        receive_time: Time,
        data: Bytes,
    ) -> Self {
        Self {
            topic: topic.into(),
            schema_name: schema_name.into(),
            receive_time,
            publish_time: None,
            size_in_bytes: data.len(),
            message: MessagePayload::Raw(data),
        }
    }

    /// Set the publish time.
    pub fn with_publish_time(mut self, publish_time: Time) -> Self {
        self.publish_time = Some(publish_time);
        self
    }
}

/// One item produced by a message iterator.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum IteratorResult {
    /// A message
    MessageEvent(MessageEvent),
    /// A non-fatal problem tied to a connection or the whole source
    Alert {
        /// Connection (channel) id, when the problem is local to one
        connection_id: Option<u32>,
        /// The problem
        alert: Alert,
    },
    /// The iterator has read everything up to and including this time
    Stamp(Time),
}

impl IteratorResult {
    /// Time carried by the result; alerts are timeless.
    pub fn time(&self) -> Option<Time> {
        match self {
            IteratorResult::MessageEvent(ev) => Some(ev.receive_time),
            IteratorResult::Stamp(t) => Some(*t),
            IteratorResult::Alert { .. } => None,
        }
    }

    /// The message event, if this result is one.
    pub fn as_message(&self) -> Option<&MessageEvent> {
        match self {
            IteratorResult::MessageEvent(ev) => Some(ev),
            _ => None,
        }
    }

    /// Convert into the message event, if this result is one.
    pub fn into_message(self) -> Option<MessageEvent> {
        match self {
            IteratorResult::MessageEvent(ev) => Some(ev),
            _ => None,
        }
    }

    /// Approximate payload size for accounting.
    pub fn size_in_bytes(&self) -> usize {
        match self {
            IteratorResult::MessageEvent(ev) => ev.size_in_bytes,
            _ => 0,
        }
    }
}

/// Detected recording format.
///
/// Used by the format detection system to pick a source implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum FileFormat {
    /// MCAP format
    Mcap,
    /// ROS1 bag format
    Bag,
    /// rosbag2 SQLite storage
    Db3,
    /// PX4 ULog
    ULog,
    /// Unknown format
    Unknown,
}

impl FileFormat {
    /// Get the file extension for this format.
    pub fn extension(&self) -> &'static str {
        match self {
            FileFormat::Mcap => "mcap",
            FileFormat::Bag => "bag",
            FileFormat::Db3 => "db3",
            FileFormat::ULog => "ulg",
            FileFormat::Unknown => "",
        }
    }
}

impl std::fmt::Display for FileFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FileFormat::Mcap => write!(f, "MCAP"),
            FileFormat::Bag => write!(f, "ROS1 Bag"),
            FileFormat::Db3 => write!(f, "ROS2 db3"),
            FileFormat::ULog => write!(f, "ULog"),
            FileFormat::Unknown => write!(f, "Unknown"),
        }
    }
}
