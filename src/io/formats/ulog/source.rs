// SPDX-FileCopyrightText: 2026 ArcheBase
//
// SPDX-License-Identifier: MulanPSL-2.0

//! ULog iterable source.
//!
//! The whole file is indexed at initialization; data records stay as slices
//! of the mapped file and are decoded into JSON objects when iterated.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::core::{PlaybackError, Result};
use crate::io::data::RecordingData;
use crate::io::filter::ConnectionFilter;
use crate::io::merge::{time_range, ChunkRecord, RecordDecoder, SortedRecordIter};
use crate::io::metadata::{
    Alert, Initialization, IteratorResult, MessageEvent, MessagePayload, SchemaInfo, TopicInfo,
};
use crate::io::traits::{finish_iterator, IterableSource, MessageIterator, MessageIteratorArgs};

use super::parser::{decode_data, decode_log, parse_ulog, MessageFormat, LOG_CONNECTION};

/// Topic carrying `L` and `C` log messages.
pub const LOG_TOPIC: &str = "/log_message";
/// Schema name of log messages.
pub const LOG_SCHEMA: &str = "ulog/LogMessage";

struct ULogTopic {
    topic: String,
    format_name: String,
}

/// Decodes ULog records with the formats read from the file.
struct ULogDecoder {
    formats: HashMap<String, MessageFormat>,
    topics: HashMap<u32, ULogTopic>,
}

impl ULogDecoder {
    fn connection_filter(&self, args: &MessageIteratorArgs) -> ConnectionFilter {
        let log = std::iter::once((LOG_CONNECTION, LOG_TOPIC));
        ConnectionFilter::from_topic_filter(
            &args.topics,
            self.topics
                .iter()
                .map(|(id, t)| (*id, t.topic.as_str()))
                .chain(log),
        )
    }
}

impl RecordDecoder for ULogDecoder {
    fn to_result(&self, record: ChunkRecord) -> IteratorResult {
        let size_in_bytes = record.data.len();
        let (topic, schema_name, decoded) = if record.connection_id == LOG_CONNECTION {
            (LOG_TOPIC, LOG_SCHEMA, decode_log(&record.data))
        } else {
            let Some(topic) = self.topics.get(&record.connection_id) else {
                return IteratorResult::Alert {
                    connection_id: Some(record.connection_id),
                    alert: Alert::warn(format!(
                        "Data for unsubscribed message id {}",
                        record.connection_id
                    )),
                };
            };
            let decoded = match self.formats.get(&topic.format_name) {
                Some(format) => decode_data(&self.formats, format, &record.data),
                None => Err(PlaybackError::parse(
                    "ULogDecoder",
                    format!("No format definition for {}", topic.format_name),
                )),
            };
            (topic.topic.as_str(), topic.format_name.as_str(), decoded)
        };

        match decoded {
            Ok(value) => IteratorResult::MessageEvent(MessageEvent {
                topic: topic.to_string(),
                schema_name: schema_name.to_string(),
                receive_time: record.log_time,
                publish_time: None,
                message: MessagePayload::Decoded(value),
                size_in_bytes,
            }),
            Err(e) => IteratorResult::Alert {
                connection_id: Some(record.connection_id),
                alert: Alert::warn(format!("Failed to decode message on {topic}")).with_error(e),
            },
        }
    }
}

/// Iterable source over a PX4 ULog file.
pub struct ULogIterableSource {
    input: RecordingData,
    state: Option<(Arc<ULogDecoder>, Arc<Vec<ChunkRecord>>)>,
}

impl ULogIterableSource {
    /// Create a source over `input`; nothing is read until `initialize`.
    pub fn new(input: RecordingData) -> Self {
        Self { input, state: None }
    }

    fn initialize_inner(&mut self) -> Result<Initialization> {
        let data = self.input.load()?;
        let index = parse_ulog(&data)?;

        let mut init = Initialization::new(self.input.name());
        init.profile = Some("px4".to_string());
        init.metadata
            .insert("ulog_version".to_string(), index.version.to_string());
        init.metadata.extend(index.info.clone());

        let mut topics = HashMap::new();
        for sub in index.subscriptions.values() {
            let topic = sub.topic();
            init.add_topic(TopicInfo::new(&topic, &sub.format_name));
            topics.insert(
                sub.msg_id as u32,
                ULogTopic {
                    topic,
                    format_name: sub.format_name.clone(),
                },
            );
        }
        for format in index.formats.values() {
            init.datatypes.insert(
                format.name.clone(),
                SchemaInfo {
                    encoding: "ulog".to_string(),
                    definition: Some(format.definition.clone()),
                },
            );
        }

        let mut has_log = false;
        for record in &index.records {
            let topic = if record.connection_id == LOG_CONNECTION {
                has_log = true;
                LOG_TOPIC
            } else {
                match topics.get(&record.connection_id) {
                    Some(t) => t.topic.as_str(),
                    None => continue,
                }
            };
            init.topic_stats
                .entry(topic.to_string())
                .or_default()
                .record(record.log_time);
        }
        if has_log {
            init.add_topic(TopicInfo::new(LOG_TOPIC, LOG_SCHEMA));
        }

        if index.dropouts.0 > 0 {
            init.alerts.push(Alert::warn(format!(
                "Log has {} dropouts totaling {} ms",
                index.dropouts.0, index.dropouts.1
            )));
        }
        for error in &index.format_errors {
            init.alerts
                .push(Alert::warn("Skipped an invalid message format").with_error(error));
        }
        if index.truncated {
            init.alerts
                .push(Alert::warn("File is truncated; the last message was skipped"));
        }

        init.start = index
            .records
            .first()
            .map(|r| r.log_time)
            .unwrap_or(index.start_time);
        init.end = index.records.last().map(|r| r.log_time).unwrap_or(init.start);

        debug!(
            context = "ULogSource",
            formats = index.formats.len(),
            subscriptions = index.subscriptions.len(),
            records = index.records.len(),
            "Indexed ULog"
        );

        let decoder = ULogDecoder {
            formats: index.formats,
            topics,
        };
        self.state = Some((Arc::new(decoder), Arc::new(index.records)));
        Ok(init.finish())
    }
}

impl IterableSource for ULogIterableSource {
    fn initialize(&mut self) -> Result<Initialization> {
        let name = self.input.name();
        self.initialize_inner()
            .map_err(|e| PlaybackError::initialization(name, e))
    }

    fn message_iterator(&self, args: MessageIteratorArgs) -> Result<Box<dyn MessageIterator>> {
        let (decoder, records) = self
            .state
            .as_ref()
            .ok_or_else(|| PlaybackError::invalid_argument("ULog source is not initialized"))?;

        let filter = decoder.connection_filter(&args);
        let range = time_range(records.as_slice(), args.start, args.end, |r| r.log_time);
        let decoder = decoder.clone();
        let iter = SortedRecordIter::new(records.clone(), range, args.reverse)
            .filter(move |r| filter.allows(r.connection_id))
            .map(move |r| Ok(decoder.to_result(r)));
        Ok(finish_iterator(iter, &args))
    }

    fn terminate(&mut self) -> Result<()> {
        self.state = None;
        Ok(())
    }
}
