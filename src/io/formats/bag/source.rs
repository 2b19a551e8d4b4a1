// SPDX-FileCopyrightText: 2026 ArcheBase
//
// SPDX-License-Identifier: MulanPSL-2.0

//! ROS1 bag iterable source.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, warn};

use crate::core::{PlaybackError, Result};
use crate::io::data::RecordingData;
use crate::io::filter::ConnectionFilter;
use crate::io::merge::{ChunkLoader, ChunkMergeIterator, ChunkRecord, ChunkSpan, RecordDecoder};
use crate::io::metadata::{
    Alert, Initialization, IteratorResult, MessageEvent, SchemaInfo, TopicInfo,
};
use crate::io::traits::{finish_iterator, IterableSource, MessageIterator, MessageIteratorArgs};

use super::parser::{parse_bag, parse_chunk, read_chunk, BagConnection, BagIndex};

/// Loads bag chunks from the file bytes and turns records into events.
pub struct BagChunkLoader {
    data: Bytes,
    chunk_positions: Vec<u64>,
    connections: HashMap<u32, BagConnection>,
}

impl BagChunkLoader {
    fn connection_filter(&self, args: &MessageIteratorArgs) -> ConnectionFilter {
        ConnectionFilter::from_topic_filter(
            &args.topics,
            self.connections
                .iter()
                .map(|(id, c)| (*id, c.topic.as_str())),
        )
    }
}

impl RecordDecoder for BagChunkLoader {
    fn to_result(&self, record: ChunkRecord) -> IteratorResult {
        match self.connections.get(&record.connection_id) {
            Some(conn) => IteratorResult::MessageEvent(MessageEvent::raw(
                &conn.topic,
                &conn.message_type,
                record.log_time,
                record.data,
            )),
            None => IteratorResult::Alert {
                connection_id: Some(record.connection_id),
                alert: Alert::warn(format!(
                    "Message on unknown connection {}",
                    record.connection_id
                )),
            },
        }
    }
}

impl ChunkLoader for BagChunkLoader {
    fn load_chunk(&self, ordinal: usize) -> Result<Vec<ChunkRecord>> {
        let pos = self.chunk_positions.get(ordinal).ok_or_else(|| {
            PlaybackError::parse("BagChunkLoader", format!("No chunk {ordinal}"))
        })?;
        let contents = read_chunk(&self.data, *pos)?;
        Ok(parse_chunk(&contents).records)
    }
}

/// Iterable source over a ROS1 bag file.
pub struct BagIterableSource {
    input: RecordingData,
    state: Option<(Arc<BagChunkLoader>, Vec<ChunkSpan>)>,
}

impl BagIterableSource {
    /// Create a source over `input`; nothing is read until `initialize`.
    pub fn new(input: RecordingData) -> Self {
        Self { input, state: None }
    }

    fn initialize_inner(&mut self) -> Result<Initialization> {
        let data = self.input.load()?;
        let index = parse_bag(&data)?;
        let mut init = Initialization::new(self.input.name());
        init.profile = Some("ros1".to_string());
        init.metadata
            .insert("version".to_string(), index.header.version.clone());

        if !index.indexed {
            warn!(
                context = "BagSource",
                chunks = index.chunks.len(),
                "Bag has no index section"
            );
            init.alerts.push(
                Alert::warn("Bag file is not indexed; chunks were scanned to build the index")
                    .with_tip("Run `rosbag reindex` on the file for faster loading"),
            );
        }

        describe(&index, &mut init);

        let spans = index
            .chunks
            .iter()
            .map(|c| ChunkSpan {
                ordinal: c.ordinal,
                start_time: c.start_time,
                end_time: c.end_time,
                connections: c.connection_counts.iter().map(|(id, _)| *id).collect(),
            })
            .collect();

        let loader = BagChunkLoader {
            data,
            chunk_positions: index.chunks.iter().map(|c| c.chunk_pos).collect(),
            connections: index.connections,
        };
        self.state = Some((Arc::new(loader), spans));

        debug!(
            context = "BagSource",
            start = init.start,
            end = init.end,
            topics = init.topics.len(),
            "Initialized bag"
        );
        Ok(init.finish())
    }
}

fn describe(index: &BagIndex, init: &mut Initialization) {
    let mut conn_ids: Vec<&u32> = index.connections.keys().collect();
    conn_ids.sort();
    for id in conn_ids {
        let conn = &index.connections[id];
        if !init.add_topic(TopicInfo::new(&conn.topic, &conn.message_type)) {
            init.alerts.push(Alert::warn(format!(
                "Topic {} is published with more than one message type",
                conn.topic
            )));
        }
        init.datatypes
            .entry(conn.message_type.clone())
            .or_insert_with(|| SchemaInfo {
                encoding: "ros1msg".to_string(),
                definition: Some(conn.message_definition.clone()),
            });
    }

    for chunk in &index.chunks {
        for (conn_id, count) in &chunk.connection_counts {
            let Some(conn) = index.connections.get(conn_id) else {
                continue;
            };
            init.topic_stats
                .entry(conn.topic.clone())
                .or_default()
                .num_messages += *count as u64;
        }
    }

    if let Some(start) = index.chunks.iter().map(|c| c.start_time).min() {
        init.start = start;
        init.end = index
            .chunks
            .iter()
            .map(|c| c.end_time)
            .max()
            .unwrap_or(start);
    }
}

impl IterableSource for BagIterableSource {
    fn initialize(&mut self) -> Result<Initialization> {
        let name = self.input.name();
        self.initialize_inner()
            .map_err(|e| PlaybackError::initialization(name, e))
    }

    fn message_iterator(&self, args: MessageIteratorArgs) -> Result<Box<dyn MessageIterator>> {
        let (loader, spans) = self
            .state
            .as_ref()
            .ok_or_else(|| PlaybackError::invalid_argument("Bag source is not initialized"))?;
        let filter = loader.connection_filter(&args);
        let iter = ChunkMergeIterator::new(loader.clone(), spans, filter, &args);
        Ok(finish_iterator(iter, &args))
    }

    fn terminate(&mut self) -> Result<()> {
        self.state = None;
        Ok(())
    }
}
