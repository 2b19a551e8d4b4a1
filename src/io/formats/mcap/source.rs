// SPDX-FileCopyrightText: 2026 ArcheBase
//
// SPDX-License-Identifier: MulanPSL-2.0

//! MCAP iterable source.
//!
//! Indexed files are read through the summary section: chunk indexes give
//! each chunk's time span and chunks are decompressed only when the merge
//! reaches them. Files without a summary or chunk index are streamed once
//! with [`mcap::MessageStream`] into an in-memory index.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, info, warn};

use crate::core::{PlaybackError, Result};
use crate::io::data::RecordingData;
use crate::io::filter::ConnectionFilter;
use crate::io::merge::{
    time_range, ChunkLoader, ChunkMergeIterator, ChunkRecord, ChunkSpan, RecordDecoder,
    SortedRecordIter,
};
use crate::io::metadata::{
    Alert, Initialization, IteratorResult, MessageEvent, MessagePayload, SchemaInfo, TopicInfo,
    TopicStats,
};
use crate::io::traits::{finish_iterator, IterableSource, MessageIterator, MessageIteratorArgs};

use super::chunk::{parse_records, read_chunk, read_header, ChunkLocation};

/// Channel information needed to turn records into message events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct McapChannel {
    /// Topic name
    pub topic: String,
    /// Schema name, empty for schemaless channels
    pub schema_name: String,
    /// Message encoding (e.g., "ros1", "cdr", "json")
    pub message_encoding: String,
}

impl McapChannel {
    fn from_mcap(channel: &mcap::Channel<'_>) -> Self {
        Self {
            topic: channel.topic.clone(),
            schema_name: channel
                .schema
                .as_ref()
                .map(|s| s.name.clone())
                .unwrap_or_default(),
            message_encoding: channel.message_encoding.clone(),
        }
    }
}

/// Converts MCAP records into message events.
#[derive(Debug, Default)]
pub struct McapDecoder {
    channels: HashMap<u32, McapChannel>,
}

impl McapDecoder {
    fn connection_filter(&self, args: &MessageIteratorArgs) -> ConnectionFilter {
        ConnectionFilter::from_topic_filter(
            &args.topics,
            self.channels.iter().map(|(id, c)| (*id, c.topic.as_str())),
        )
    }
}

impl RecordDecoder for McapDecoder {
    fn to_result(&self, record: ChunkRecord) -> IteratorResult {
        let Some(channel) = self.channels.get(&record.connection_id) else {
            return IteratorResult::Alert {
                connection_id: Some(record.connection_id),
                alert: Alert::warn(format!(
                    "Message on unknown channel {}",
                    record.connection_id
                )),
            };
        };

        let size_in_bytes = record.data.len();
        let message = if channel.message_encoding == "json" {
            match serde_json::from_slice(&record.data) {
                Ok(value) => MessagePayload::Decoded(value),
                Err(e) => {
                    return IteratorResult::Alert {
                        connection_id: Some(record.connection_id),
                        alert: Alert::warn(format!(
                            "Failed to decode JSON message on {}",
                            channel.topic
                        ))
                        .with_error(e),
                    }
                }
            }
        } else {
            MessagePayload::Raw(record.data)
        };

        IteratorResult::MessageEvent(MessageEvent {
            topic: channel.topic.clone(),
            schema_name: channel.schema_name.clone(),
            receive_time: record.log_time,
            publish_time: record.publish_time,
            message,
            size_in_bytes,
        })
    }
}

/// Loads chunks straight from the file bytes.
pub struct McapChunkLoader {
    data: Bytes,
    chunks: Vec<ChunkLocation>,
    decoder: McapDecoder,
}

impl RecordDecoder for McapChunkLoader {
    fn to_result(&self, record: ChunkRecord) -> IteratorResult {
        self.decoder.to_result(record)
    }
}

impl ChunkLoader for McapChunkLoader {
    fn load_chunk(&self, ordinal: usize) -> Result<Vec<ChunkRecord>> {
        let location = self.chunks.get(ordinal).ok_or_else(|| {
            PlaybackError::parse("McapChunkLoader", format!("No chunk {ordinal}"))
        })?;
        let records = read_chunk(&self.data, location)?;
        parse_records(&records)
    }
}

enum McapIndex {
    Chunked {
        loader: Arc<McapChunkLoader>,
        spans: Vec<ChunkSpan>,
    },
    InMemory {
        decoder: Arc<McapDecoder>,
        records: Arc<Vec<ChunkRecord>>,
    },
}

/// Iterable source over an MCAP file.
pub struct McapIterableSource {
    input: RecordingData,
    index: Option<McapIndex>,
}

impl McapIterableSource {
    /// Create a source over `input`; nothing is read until `initialize`.
    pub fn new(input: RecordingData) -> Self {
        Self { input, index: None }
    }

    fn initialize_inner(&mut self) -> Result<Initialization> {
        let data = self.input.load()?;
        let mut init = Initialization::new(self.input.name());

        if let Some((profile, library)) = read_header(&data) {
            if !profile.is_empty() {
                init.profile = Some(profile);
            }
            if !library.is_empty() {
                init.metadata.insert("library".to_string(), library);
            }
        } else {
            return Err(PlaybackError::parse("McapSource", "Missing MCAP magic or header"));
        }

        let summary = match mcap::Summary::read(&data) {
            Ok(summary) => summary,
            Err(e) => {
                warn!(
                    context = "McapSource",
                    error = %e,
                    "Failed to read summary, scanning data section"
                );
                init.alerts.push(
                    Alert::warn("Invalid summary section; the file was scanned instead")
                        .with_error(e),
                );
                None
            }
        };

        match summary {
            Some(summary) if !summary.chunk_indexes.is_empty() => {
                self.index = Some(index_from_summary(&summary, data.clone(), &mut init));
            }
            Some(_) => {
                info!(context = "McapSource", "MCAP file has no chunk index, scanning");
                init.alerts.push(Alert::info(
                    "File has no chunk index; all messages were loaded into memory",
                ));
                self.index = Some(scan_messages(&data, &mut init)?);
            }
            None => {
                init.alerts.push(
                    Alert::warn("File has no summary section")
                        .with_tip("All messages were loaded into memory; re-index the file with `mcap recover` for faster loading"),
                );
                self.index = Some(scan_messages(&data, &mut init)?);
            }
        }

        Ok(init.finish())
    }
}

fn index_from_summary(
    summary: &mcap::Summary,
    data: Bytes,
    init: &mut Initialization,
) -> McapIndex {
    let mut channels = HashMap::new();
    for (id, channel) in &summary.channels {
        let info = McapChannel::from_mcap(channel);
        if !init.add_topic(TopicInfo::new(&info.topic, &info.schema_name)) {
            init.alerts.push(Alert::warn(format!(
                "Topic {} has channels with different schemas",
                info.topic
            )));
        }
        if let Some(schema) = channel.schema.as_ref() {
            init.datatypes
                .entry(schema.name.clone())
                .or_insert_with(|| SchemaInfo {
                    encoding: schema.encoding.clone(),
                    definition: String::from_utf8(schema.data.to_vec()).ok(),
                });
        }
        channels.insert(*id as u32, info);
    }

    if let Some(stats) = &summary.stats {
        for (channel_id, count) in &stats.channel_message_counts {
            if let Some(channel) = channels.get(&(*channel_id as u32)) {
                init.topic_stats
                    .entry(channel.topic.clone())
                    .or_insert_with(TopicStats::default)
                    .num_messages += count;
            }
        }
    }

    let mut locations = Vec::with_capacity(summary.chunk_indexes.len());
    let mut spans = Vec::with_capacity(summary.chunk_indexes.len());
    for (ordinal, index) in summary.chunk_indexes.iter().enumerate() {
        locations.push(ChunkLocation::from(index));
        spans.push(ChunkSpan {
            ordinal,
            start_time: index.message_start_time,
            end_time: index.message_end_time,
            connections: index
                .message_index_offsets
                .keys()
                .map(|id| *id as u32)
                .collect(),
        });
    }

    match &summary.stats {
        Some(stats) if stats.message_count > 0 => {
            init.start = stats.message_start_time;
            init.end = stats.message_end_time;
        }
        _ => {
            init.start = spans.iter().map(|s| s.start_time).min().unwrap_or(0);
            init.end = spans.iter().map(|s| s.end_time).max().unwrap_or(init.start);
        }
    }

    debug!(
        context = "McapSource",
        channels = channels.len(),
        chunks = spans.len(),
        start = init.start,
        end = init.end,
        "Indexed MCAP summary"
    );

    McapIndex::Chunked {
        loader: Arc::new(McapChunkLoader {
            data,
            chunks: locations,
            decoder: McapDecoder { channels },
        }),
        spans,
    }
}

fn scan_messages(data: &Bytes, init: &mut Initialization) -> Result<McapIndex> {
    let stream = mcap::MessageStream::new(data)
        .map_err(|e| PlaybackError::parse("McapSource", e.to_string()))?;

    let mut channels: HashMap<u32, McapChannel> = HashMap::new();
    let mut records = Vec::new();
    for message in stream {
        let message = match message {
            Ok(m) => m,
            Err(e) => {
                warn!(
                    context = "McapSource",
                    error = %e,
                    messages = records.len(),
                    "Stopped scanning at unreadable record"
                );
                init.alerts.push(
                    Alert::warn("File is truncated or corrupt; later messages are unavailable")
                        .with_error(e),
                );
                break;
            }
        };

        let id = message.channel.id as u32;
        if !channels.contains_key(&id) {
            let info = McapChannel::from_mcap(&message.channel);
            init.add_topic(TopicInfo::new(&info.topic, &info.schema_name));
            if let Some(schema) = message.channel.schema.as_ref() {
                init.datatypes
                    .entry(schema.name.clone())
                    .or_insert_with(|| SchemaInfo {
                        encoding: schema.encoding.clone(),
                        definition: String::from_utf8(schema.data.to_vec()).ok(),
                    });
            }
            channels.insert(id, info);
        }
        if let Some(channel) = channels.get(&id) {
            init.topic_stats
                .entry(channel.topic.clone())
                .or_default()
                .record(message.log_time);
        }

        records.push(ChunkRecord {
            connection_id: id,
            log_time: message.log_time,
            publish_time: Some(message.publish_time),
            data: Bytes::copy_from_slice(&message.data),
        });
    }

    // Stable: equal times keep file order
    records.sort_by_key(|r| r.log_time);
    init.start = records.first().map(|r| r.log_time).unwrap_or(0);
    init.end = records.last().map(|r| r.log_time).unwrap_or(0);

    Ok(McapIndex::InMemory {
        decoder: Arc::new(McapDecoder { channels }),
        records: Arc::new(records),
    })
}

impl IterableSource for McapIterableSource {
    fn initialize(&mut self) -> Result<Initialization> {
        let name = self.input.name();
        self.initialize_inner()
            .map_err(|e| PlaybackError::initialization(name, e))
    }

    fn message_iterator(&self, args: MessageIteratorArgs) -> Result<Box<dyn MessageIterator>> {
        let index = self.index.as_ref().ok_or_else(|| {
            PlaybackError::invalid_argument("MCAP source is not initialized")
        })?;

        match index {
            McapIndex::Chunked { loader, spans } => {
                let filter = loader.decoder.connection_filter(&args);
                let iter = ChunkMergeIterator::new(loader.clone(), spans, filter, &args);
                Ok(finish_iterator(iter, &args))
            }
            McapIndex::InMemory { decoder, records } => {
                let filter = decoder.connection_filter(&args);
                let range = time_range(records.as_slice(), args.start, args.end, |r| r.log_time);
                let decoder = decoder.clone();
                let iter = SortedRecordIter::new(records.clone(), range, args.reverse)
                    .filter(move |r| filter.allows(r.connection_id))
                    .map(move |r| Ok(decoder.to_result(r)));
                Ok(finish_iterator(iter, &args))
            }
        }
    }

    fn terminate(&mut self) -> Result<()> {
        self.index = None;
        Ok(())
    }
}
