// SPDX-FileCopyrightText: 2026 ArcheBase
//
// SPDX-License-Identifier: MulanPSL-2.0

//! rosbag2 SQLite (`.db3`) iterable source.
//!
//! Topics come from the `topics` table and statistics from aggregate
//! queries over `messages`. Iteration pages through `messages` with keyset
//! queries ordered by `(timestamp, id)`, so memory stays bounded by one
//! page. Backfill is answered directly with one `LIMIT 1` query per topic.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use rusqlite::{params, Connection, OpenFlags};
use tracing::{debug, warn};

use crate::core::{PlaybackError, Result, Time};
use crate::io::data::RecordingData;
use crate::io::metadata::{
    Alert, Initialization, IteratorResult, MessageEvent, SchemaInfo, TopicInfo, TopicStats,
};
use crate::io::traits::{
    finish_iterator, GetBackfillMessagesArgs, IterableSource, MessageIterator, MessageIteratorArgs,
};

/// Rows fetched per keyset query.
const PAGE_SIZE: usize = 1000;

fn sql_err(e: rusqlite::Error) -> PlaybackError {
    PlaybackError::io("Db3Source", e.to_string())
}

fn lock(conn: &Mutex<Connection>) -> Result<std::sync::MutexGuard<'_, Connection>> {
    conn.lock()
        .map_err(|_| PlaybackError::Other("db3 connection lock poisoned".to_string()))
}

fn to_db_time(time: Time) -> i64 {
    time.min(i64::MAX as u64) as i64
}

fn from_db_time(time: i64) -> Time {
    time.max(0) as Time
}

/// A row of the `topics` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Db3Topic {
    /// Topic name
    pub name: String,
    /// Message type (e.g., "std_msgs/msg/String")
    pub message_type: String,
    /// Serialization format (e.g., "cdr")
    pub serialization_format: String,
}

struct Db3State {
    conn: Arc<Mutex<Connection>>,
    topics: Arc<HashMap<i64, Db3Topic>>,
}

/// Iterable source over a rosbag2 SQLite database.
pub struct Db3IterableSource {
    path: PathBuf,
    state: Option<Db3State>,
}

impl Db3IterableSource {
    /// Create a source over a local `.db3` file.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            state: None,
        }
    }

    /// Create a source from recording data; only local files are supported.
    pub fn from_data(input: RecordingData) -> Result<Self> {
        match input.path() {
            Some(path) => Ok(Self::new(path)),
            None => Err(PlaybackError::unsupported(
                "rosbag2 db3 databases can only be read from local files",
            )),
        }
    }

    fn state(&self) -> Result<&Db3State> {
        self.state
            .as_ref()
            .ok_or_else(|| PlaybackError::invalid_argument("db3 source is not initialized"))
    }

    fn initialize_inner(&mut self) -> Result<Initialization> {
        let conn = Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(sql_err)?;

        let mut topics = HashMap::new();
        {
            let mut stmt = conn
                .prepare("SELECT id, name, type, serialization_format FROM topics")
                .map_err(sql_err)?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        Db3Topic {
                            name: row.get(1)?,
                            message_type: row.get(2)?,
                            serialization_format: row.get(3)?,
                        },
                    ))
                })
                .map_err(sql_err)?;
            for row in rows {
                let (id, topic) = row.map_err(sql_err)?;
                topics.insert(id, topic);
            }
        }

        let mut init = Initialization::new(self.path.display().to_string());
        init.profile = Some("ros2".to_string());
        for topic in topics.values() {
            init.add_topic(TopicInfo::new(&topic.name, &topic.message_type));
            init.datatypes
                .entry(topic.message_type.clone())
                .or_insert_with(|| SchemaInfo {
                    encoding: "ros2msg".to_string(),
                    definition: None,
                });
        }

        {
            let mut stmt = conn
                .prepare(
                    "SELECT topic_id, COUNT(*), MIN(timestamp), MAX(timestamp) \
                     FROM messages GROUP BY topic_id",
                )
                .map_err(sql_err)?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, i64>(3)?,
                    ))
                })
                .map_err(sql_err)?;
            for row in rows {
                let (topic_id, count, first, last) = row.map_err(sql_err)?;
                let Some(topic) = topics.get(&topic_id) else {
                    warn!(
                        context = "Db3Source",
                        topic_id,
                        count,
                        "Messages reference an unknown topic id"
                    );
                    init.alerts.push(
                        Alert::warn(format!(
                            "{count} messages reference unknown topic id {topic_id}"
                        ))
                        .with_tip("These messages are skipped during playback"),
                    );
                    continue;
                };
                let stats = init.topic_stats.entry(topic.name.clone()).or_default();
                stats.merge(&TopicStats {
                    num_messages: count.max(0) as u64,
                    first_message_time: Some(from_db_time(first)),
                    last_message_time: Some(from_db_time(last)),
                });
            }
        }

        debug!(
            context = "Db3Source",
            path = %self.path.display(),
            topics = topics.len(),
            messages = init.message_count(),
            "Initialized db3"
        );

        self.state = Some(Db3State {
            conn: Arc::new(Mutex::new(conn)),
            topics: Arc::new(topics),
        });
        Ok(init.finish())
    }
}

impl IterableSource for Db3IterableSource {
    fn initialize(&mut self) -> Result<Initialization> {
        let origin = self.path.display().to_string();
        self.initialize_inner()
            .map_err(|e| PlaybackError::initialization(origin, e))
    }

    fn message_iterator(&self, args: MessageIteratorArgs) -> Result<Box<dyn MessageIterator>> {
        let state = self.state()?;
        let topic_ids: Vec<i64> = state
            .topics
            .iter()
            .filter(|(_, t)| args.topics.should_include(&t.name))
            .map(|(id, _)| *id)
            .collect();

        let iter = Db3MessageIter::new(
            state.conn.clone(),
            state.topics.clone(),
            &topic_ids,
            &args,
        );
        Ok(finish_iterator(iter, &args))
    }

    fn get_backfill_messages(&self, args: GetBackfillMessagesArgs) -> Result<Vec<MessageEvent>> {
        let state = self.state()?;
        let conn = lock(&state.conn)?;
        let mut stmt = conn
            .prepare_cached(
                "SELECT timestamp, data FROM messages \
                 WHERE topic_id = ?1 AND timestamp <= ?2 \
                 ORDER BY timestamp DESC, id DESC LIMIT 1",
            )
            .map_err(sql_err)?;

        let mut messages = Vec::new();
        for (id, topic) in state.topics.iter() {
            if !args.topics.iter().any(|t| *t == topic.name) {
                continue;
            }
            let mut rows = stmt
                .query(params![id, to_db_time(args.time)])
                .map_err(sql_err)?;
            if let Some(row) = rows.next().map_err(sql_err)? {
                let timestamp: i64 = row.get(0).map_err(sql_err)?;
                let data: Vec<u8> = row.get(1).map_err(sql_err)?;
                messages.push(MessageEvent::raw(
                    &topic.name,
                    &topic.message_type,
                    from_db_time(timestamp),
                    Bytes::from(data),
                ));
            }
        }

        messages.sort_by(|a, b| {
            a.receive_time
                .cmp(&b.receive_time)
                .then_with(|| a.topic.cmp(&b.topic))
        });
        Ok(messages)
    }

    fn terminate(&mut self) -> Result<()> {
        self.state = None;
        Ok(())
    }
}

/// Paged keyset iterator over the `messages` table.
struct Db3MessageIter {
    conn: Arc<Mutex<Connection>>,
    topics: Arc<HashMap<i64, Db3Topic>>,
    sql: String,
    start: i64,
    end: i64,
    reverse: bool,
    /// Last `(timestamp, id)` returned
    position: (i64, i64),
    buffer: VecDeque<IteratorResult>,
    done: bool,
}

impl Db3MessageIter {
    fn new(
        conn: Arc<Mutex<Connection>>,
        topics: Arc<HashMap<i64, Db3Topic>>,
        topic_ids: &[i64],
        args: &MessageIteratorArgs,
    ) -> Self {
        let topic_clause = if topic_ids.len() == topics.len() {
            String::new()
        } else {
            let ids: Vec<String> = topic_ids.iter().map(|id| id.to_string()).collect();
            format!(" AND topic_id IN ({})", ids.join(","))
        };
        let (keyset, order) = if args.reverse {
            (
                "(timestamp < ?1 OR (timestamp = ?1 AND id < ?2))",
                "timestamp DESC, id DESC",
            )
        } else {
            (
                "(timestamp > ?1 OR (timestamp = ?1 AND id > ?2))",
                "timestamp ASC, id ASC",
            )
        };
        let sql = format!(
            "SELECT id, topic_id, timestamp, data FROM messages \
             WHERE timestamp >= ?3 AND timestamp <= ?4{topic_clause} AND {keyset} \
             ORDER BY {order} LIMIT {PAGE_SIZE}"
        );

        Self {
            conn,
            topics,
            sql,
            start: args.start.map_or(i64::MIN, to_db_time),
            end: args.end.map_or(i64::MAX, to_db_time),
            reverse: args.reverse,
            position: if args.reverse {
                (i64::MAX, i64::MAX)
            } else {
                (i64::MIN, i64::MIN)
            },
            buffer: VecDeque::new(),
            done: topic_ids.is_empty(),
        }
    }

    fn fetch_page(&mut self) -> Result<()> {
        let conn = lock(&self.conn)?;
        let mut stmt = conn.prepare_cached(&self.sql).map_err(sql_err)?;
        let rows = stmt
            .query_map(
                params![self.position.0, self.position.1, self.start, self.end],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, Vec<u8>>(3)?,
                    ))
                },
            )
            .map_err(sql_err)?;

        let mut fetched = 0;
        for row in rows {
            let (id, topic_id, timestamp, data) = row.map_err(sql_err)?;
            fetched += 1;
            self.position = (timestamp, id);
            if let Some(topic) = self.topics.get(&topic_id) {
                self.buffer.push_back(IteratorResult::MessageEvent(MessageEvent::raw(
                    &topic.name,
                    &topic.message_type,
                    from_db_time(timestamp),
                    Bytes::from(data),
                )));
            }
        }

        if fetched < PAGE_SIZE {
            self.done = true;
        }
        debug!(
            context = "Db3Source",
            fetched,
            reverse = self.reverse,
            "Fetched message page"
        );
        Ok(())
    }
}

impl Iterator for Db3MessageIter {
    type Item = Result<IteratorResult>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(result) = self.buffer.pop_front() {
                return Some(Ok(result));
            }
            if self.done {
                return None;
            }
            if let Err(e) = self.fetch_page() {
                self.done = true;
                return Some(Err(e.into_iteration()));
            }
        }
    }
}
