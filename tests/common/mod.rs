// SPDX-FileCopyrightText: 2026 ArcheBase
//
// SPDX-License-Identifier: MulanPSL-2.0

//! Common utilities for integration tests.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use roboplay::io::{IterableSource, IteratorResult, MessageIteratorArgs};
use roboplay::Time;
use rusqlite::{params, Connection};

/// `(topic, receive time, payload)`.
pub type Fixture<'a> = (&'a str, Time, &'a [u8]);

/// `/a` at 0, 5, 10 and `/b` at 2, 8.
pub const SCENARIO: &[Fixture<'static>] = &[
    ("/a", 0, b"a0"),
    ("/b", 2, b"b2"),
    ("/a", 5, b"a5"),
    ("/b", 8, b"b8"),
    ("/a", 10, b"a10"),
];

// ============================================================================
// Formats
// ============================================================================

/// Recording formats the fixtures can be written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Mcap,
    Bag,
    Db3,
}

impl Format {
    pub const ALL: [Format; 3] = [Format::Mcap, Format::Bag, Format::Db3];

    pub fn extension(self) -> &'static str {
        match self {
            Format::Mcap => "mcap",
            Format::Bag => "bag",
            Format::Db3 => "db3",
        }
    }

    /// Write `messages` to `dir/<stem>.<ext>`.
    pub fn write(self, dir: &Path, stem: &str, messages: &[Fixture<'_>]) -> PathBuf {
        let path = dir.join(format!("{stem}.{}", self.extension()));
        match self {
            Format::Mcap => write_mcap(&path, messages),
            Format::Bag => write_bag(&path, messages, 2),
            Format::Db3 => write_db3(&path, messages),
        }
        path
    }
}

fn schema_name(topic: &str) -> &'static str {
    if topic == "/b" {
        "std_msgs/msg/Int32"
    } else {
        "std_msgs/msg/String"
    }
}

// ============================================================================
// MCAP
// ============================================================================

/// Write an indexed, chunked MCAP file with one CDR channel per topic.
pub fn write_mcap(path: &Path, messages: &[Fixture<'_>]) {
    write_mcap_encoded(path, messages, "cdr");
}

/// Same as [`write_mcap`] with JSON payloads.
pub fn write_mcap_json(path: &Path, messages: &[Fixture<'_>]) {
    write_mcap_encoded(path, messages, "json");
}

fn write_mcap_encoded(path: &Path, messages: &[Fixture<'_>], encoding: &str) {
    let file = BufWriter::new(File::create(path).unwrap());
    // Small chunks so fixtures span several of them
    let mut writer = mcap::WriteOptions::new()
        .chunk_size(Some(64))
        .create(file)
        .unwrap();

    let schema_encoding = if encoding == "json" { "jsonschema" } else { "ros2msg" };
    let mut channels: BTreeMap<&str, u16> = BTreeMap::new();
    for (sequence, (topic, time, data)) in messages.iter().enumerate() {
        let channel_id = match channels.get(topic) {
            Some(id) => *id,
            None => {
                let schema_id = writer
                    .add_schema(schema_name(topic), schema_encoding, b"string data")
                    .unwrap();
                let id = writer
                    .add_channel(schema_id, topic, encoding, &BTreeMap::new())
                    .unwrap();
                channels.insert(topic, id);
                id
            }
        };
        writer
            .write_to_known_channel(
                &mcap::records::MessageHeader {
                    channel_id,
                    sequence: sequence as u32,
                    log_time: *time,
                    publish_time: *time,
                },
                data,
            )
            .unwrap();
    }
    writer.finish().unwrap();
}

// ============================================================================
// ROS1 bag
// ============================================================================

const OP_MSG_DATA: u8 = 0x02;
const OP_BAG_HEADER: u8 = 0x03;
const OP_CHUNK: u8 = 0x05;
const OP_CHUNK_INFO: u8 = 0x06;
const OP_CONNECTION: u8 = 0x07;

fn field(name: &str, value: &[u8]) -> Vec<u8> {
    let mut out = ((name.len() + 1 + value.len()) as u32).to_le_bytes().to_vec();
    out.extend(name.as_bytes());
    out.push(b'=');
    out.extend(value);
    out
}

fn record(header: &[u8], data: &[u8]) -> Vec<u8> {
    let mut out = (header.len() as u32).to_le_bytes().to_vec();
    out.extend(header);
    out.extend((data.len() as u32).to_le_bytes());
    out.extend(data);
    out
}

fn bag_time(time: Time) -> Vec<u8> {
    let mut out = ((time / 1_000_000_000) as u32).to_le_bytes().to_vec();
    out.extend(((time % 1_000_000_000) as u32).to_le_bytes());
    out
}

fn bag_connection(conn: u32, topic: &str) -> Vec<u8> {
    let mut header = field("op", &[OP_CONNECTION]);
    header.extend(field("conn", &conn.to_le_bytes()));
    header.extend(field("topic", topic.as_bytes()));
    let mut data = field("type", schema_name(topic).replace("/msg/", "/").as_bytes());
    data.extend(field("md5sum", b"992ce8a1687cec8c8bd883ec73ca41d1"));
    data.extend(field("message_definition", b"string data\n"));
    record(&header, &data)
}

fn bag_message(conn: u32, time: Time, payload: &[u8]) -> Vec<u8> {
    let mut header = field("op", &[OP_MSG_DATA]);
    header.extend(field("conn", &conn.to_le_bytes()));
    header.extend(field("time", &bag_time(time)));
    record(&header, payload)
}

fn bag_header(index_pos: u64, conn_count: u32, chunk_count: u32) -> Vec<u8> {
    let mut h = field("op", &[OP_BAG_HEADER]);
    h.extend(field("index_pos", &index_pos.to_le_bytes()));
    h.extend(field("conn_count", &conn_count.to_le_bytes()));
    h.extend(field("chunk_count", &chunk_count.to_le_bytes()));
    record(&h, &[b' '; 16])
}

/// Write an indexed bag with uncompressed chunks of `per_chunk` messages,
/// in the order given.
pub fn write_bag(path: &Path, messages: &[Fixture<'_>], per_chunk: usize) {
    let mut topics: Vec<&str> = Vec::new();
    for (topic, _, _) in messages {
        if !topics.contains(topic) {
            topics.push(topic);
        }
    }
    let conn_of = |topic: &str| topics.iter().position(|t| *t == topic).unwrap_or(0) as u32;

    let mut out = b"#ROSBAG V2.0\n".to_vec();
    let header_pos = out.len();
    out.extend(bag_header(0, 0, 0));

    let mut chunk_infos = Vec::new();
    for chunk in messages.chunks(per_chunk.max(1)) {
        let mut counts: BTreeMap<u32, u32> = BTreeMap::new();
        let mut body = Vec::new();
        for (topic, _, _) in chunk {
            let conn = conn_of(topic);
            if !counts.contains_key(&conn) {
                body.extend(bag_connection(conn, topic));
            }
            *counts.entry(conn).or_default() += 1;
        }
        for (topic, time, data) in chunk {
            body.extend(bag_message(conn_of(topic), *time, data));
        }

        let chunk_pos = out.len() as u64;
        let mut chunk_header = field("op", &[OP_CHUNK]);
        chunk_header.extend(field("compression", b"none"));
        chunk_header.extend(field("size", &(body.len() as u32).to_le_bytes()));
        out.extend(record(&chunk_header, &body));

        let start = chunk.iter().map(|(_, t, _)| *t).min().unwrap_or(0);
        let end = chunk.iter().map(|(_, t, _)| *t).max().unwrap_or(0);
        chunk_infos.push((chunk_pos, start, end, counts));
    }

    let index_pos = out.len() as u64;
    for (conn, topic) in topics.iter().enumerate() {
        out.extend(bag_connection(conn as u32, topic));
    }
    for (chunk_pos, start, end, counts) in &chunk_infos {
        let mut info = field("op", &[OP_CHUNK_INFO]);
        info.extend(field("ver", &1u32.to_le_bytes()));
        info.extend(field("chunk_pos", &chunk_pos.to_le_bytes()));
        info.extend(field("start_time", &bag_time(*start)));
        info.extend(field("end_time", &bag_time(*end)));
        info.extend(field("count", &(counts.len() as u32).to_le_bytes()));
        let mut data = Vec::new();
        for (conn, count) in counts {
            data.extend(conn.to_le_bytes());
            data.extend(count.to_le_bytes());
        }
        out.extend(record(&info, &data));
    }

    let patched = bag_header(index_pos, topics.len() as u32, chunk_infos.len() as u32);
    out[header_pos..header_pos + patched.len()].copy_from_slice(&patched);
    std::fs::write(path, out).unwrap();
}

// ============================================================================
// rosbag2 db3
// ============================================================================

/// Write a rosbag2 SQLite database.
pub fn write_db3(path: &Path, messages: &[Fixture<'_>]) {
    let conn = Connection::open(path).unwrap();
    conn.execute_batch(
        "CREATE TABLE topics (id INTEGER PRIMARY KEY, name TEXT NOT NULL, type TEXT NOT NULL, \
           serialization_format TEXT NOT NULL, offered_qos_profiles TEXT NOT NULL);
         CREATE TABLE messages (id INTEGER PRIMARY KEY, topic_id INTEGER NOT NULL, \
           timestamp INTEGER NOT NULL, data BLOB NOT NULL);",
    )
    .unwrap();

    let mut topics: Vec<&str> = Vec::new();
    for (topic, time, data) in messages {
        let id = match topics.iter().position(|t| t == topic) {
            Some(i) => i + 1,
            None => {
                topics.push(topic);
                conn.execute(
                    "INSERT INTO topics VALUES (?1, ?2, ?3, 'cdr', '')",
                    params![topics.len() as i64, topic, schema_name(topic)],
                )
                .unwrap();
                topics.len()
            }
        };
        conn.execute(
            "INSERT INTO messages (topic_id, timestamp, data) VALUES (?1, ?2, ?3)",
            params![id as i64, *time as i64, data],
        )
        .unwrap();
    }
}

// ============================================================================
// ULog
// ============================================================================

pub fn ulog_message(msg_type: u8, body: &[u8]) -> Vec<u8> {
    let mut out = (body.len() as u16).to_le_bytes().to_vec();
    out.push(msg_type);
    out.extend(body);
    out
}

/// Write a ULog file. Each sample is `(format name, timestamp in µs, value)`;
/// every format has a single `float value` field.
pub fn write_ulog(path: &Path, start_micros: u64, samples: &[(&str, u64, f32)]) {
    let mut out = b"ULog\x01\x12\x35".to_vec();
    out.push(1);
    out.extend(start_micros.to_le_bytes());

    let mut names: Vec<&str> = Vec::new();
    for (name, _, _) in samples {
        if !names.contains(name) {
            names.push(name);
        }
    }
    for name in &names {
        let format = format!("{name}:uint64_t timestamp;float value;");
        out.extend(ulog_message(b'F', format.as_bytes()));
    }
    for (id, name) in names.iter().enumerate() {
        let mut add = vec![0u8];
        add.extend((id as u16).to_le_bytes());
        add.extend(name.as_bytes());
        out.extend(ulog_message(b'A', &add));
    }
    for (name, micros, value) in samples {
        let id = names.iter().position(|n| n == name).unwrap_or(0) as u16;
        let mut data = id.to_le_bytes().to_vec();
        data.extend(micros.to_le_bytes());
        data.extend(value.to_le_bytes());
        out.extend(ulog_message(b'D', &data));
    }
    std::fs::write(path, out).unwrap();
}

// ============================================================================
// Collection helpers
// ============================================================================

/// Every result of an iteration; panics on the first error.
pub fn collect_results(
    source: &dyn IterableSource,
    args: MessageIteratorArgs,
) -> Vec<IteratorResult> {
    source
        .message_iterator(args)
        .unwrap()
        .map(|r| r.unwrap())
        .collect()
}

/// `(topic, receive time)` of every message in an iteration.
pub fn collect_messages(
    source: &dyn IterableSource,
    args: MessageIteratorArgs,
) -> Vec<(String, Time)> {
    collect_results(source, args)
        .into_iter()
        .filter_map(IteratorResult::into_message)
        .map(|m| (m.topic, m.receive_time))
        .collect()
}

/// Owned `(topic, time)` pairs for comparisons.
pub fn pairs(expected: &[(&str, Time)]) -> Vec<(String, Time)> {
    expected.iter().map(|(t, time)| (t.to_string(), *time)).collect()
}
