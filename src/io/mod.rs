// SPDX-FileCopyrightText: 2026 ArcheBase
//
// SPDX-License-Identifier: MulanPSL-2.0

//! Sources and iteration.
//!
//! This module provides the source contract ([`IterableSource`]), the
//! per-format implementations, the multi-source combinator and the cursor
//! used by the player to pull results.

pub mod cursor;
pub mod data;
pub mod detection;
pub mod filter;
pub mod formats;
pub mod merge;
pub mod metadata;
pub mod multi;
pub mod open;
pub mod traits;

// Re-exports
pub use cursor::{IteratorCursor, MessageCursor};
pub use data::RecordingData;
pub use detection::detect_format;
pub use filter::TopicFilter;
pub use metadata::{
    Alert, AlertSeverity, FileFormat, Initialization, IteratorResult, MessageEvent,
    MessagePayload, SchemaInfo, TopicInfo, TopicStats,
};
pub use multi::MultiIterableSource;
pub use open::{open_file, open_source, InitArgs};
pub use traits::{GetBackfillMessagesArgs, IterableSource, MessageIterator, MessageIteratorArgs};
