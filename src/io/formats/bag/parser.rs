// SPDX-FileCopyrightText: 2026 ArcheBase
//
// SPDX-License-Identifier: MulanPSL-2.0

//! ROS1 bag record parser.
//!
//! Reads the bag header to locate the index section, then the connection
//! and chunk info records it holds, so chunks can be decompressed on demand.
//! Bags without a usable index are scanned once from the front.
//!
//! # BAG Format Structure (Version 2.0)
//!
//! ## File Header
//! - Magic: "#ROSBAG V2.0\n" (13 bytes)
//! - Followed by bag header record in standard record format
//!
//! ## Record Format
//! All records follow: `<header_len: u32><header><data_len: u32><data>`
//! where header contains `<field_len: u32><field_name>=<field_value>` pairs
//!
//! ## Op Codes
//! - 0x02: Message data
//! - 0x03: Bag header
//! - 0x04: Index data
//! - 0x05: Chunk
//! - 0x06: Chunk info
//! - 0x07: Connection

use std::collections::HashMap;
use std::io::{Cursor, Read};

use byteorder::{LittleEndian, ReadBytesExt};
use bytes::Bytes;
use tracing::debug;

use crate::core::time::from_sec_nsec;
use crate::core::{PlaybackError, Result, Time};
use crate::io::merge::ChunkRecord;

/// BAG op codes
pub const OP_MSG_DATA: u8 = 0x02;
pub const OP_BAG_HEADER: u8 = 0x03;
pub const OP_CHUNK: u8 = 0x05;
pub const OP_CHUNK_INFO: u8 = 0x06;
pub const OP_CONNECTION: u8 = 0x07;

/// BAG magic string
const MAGIC: &[u8] = b"#ROSBAG V";
/// Magic plus "2.0\n"
const PREAMBLE_LEN: usize = 13;

/// BAG file header information.
#[derive(Debug, Clone, Default)]
pub struct BagHeader {
    /// Version string (e.g., "2.0")
    pub version: String,
    /// Position of index section in file
    pub index_pos: u64,
    /// Number of connections in the file
    pub conn_count: u32,
    /// Number of chunks in the file
    pub chunk_count: u32,
}

/// BAG chunk information for random access.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BagChunkInfo {
    /// Chunk position in file order
    pub ordinal: usize,
    /// Offset of chunk record in file (position of header_len)
    pub chunk_pos: u64,
    /// Start time of messages in this chunk
    pub start_time: Time,
    /// End time of messages in this chunk
    pub end_time: Time,
    /// Message count per connection ID
    pub connection_counts: Vec<(u32, u32)>,
}

impl BagChunkInfo {
    /// Total number of messages in the chunk.
    pub fn message_count(&self) -> u64 {
        self.connection_counts.iter().map(|(_, c)| *c as u64).sum()
    }
}

/// BAG connection information.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BagConnection {
    /// Connection ID
    pub conn_id: u32,
    /// Topic name
    pub topic: String,
    /// Message type
    pub message_type: String,
    /// MD5 sum of message definition
    pub md5sum: String,
    /// Message definition text
    pub message_definition: String,
    /// Caller ID (publishing node)
    pub caller_id: String,
}

/// Everything needed to iterate a bag.
#[derive(Debug, Clone, Default)]
pub struct BagIndex {
    /// File header
    pub header: BagHeader,
    /// Chunks in file order
    pub chunks: Vec<BagChunkInfo>,
    /// Connections by ID
    pub connections: HashMap<u32, BagConnection>,
    /// Whether the index section was used (false after a scan)
    pub indexed: bool,
}

/// Parsed fields from a BAG record header
#[derive(Debug, Default)]
struct RecordHeader {
    op: Option<u8>,
    conn: Option<u32>,
    time: Option<Time>,
    topic: Option<String>,
    md5sum: Option<String>,
    message_type: Option<String>,
    message_definition: Option<String>,
    callerid: Option<String>,
    index_pos: Option<u64>,
    conn_count: Option<u32>,
    chunk_count: Option<u32>,
    chunk_pos: Option<u64>,
    start_time: Option<Time>,
    end_time: Option<Time>,
    compression: Option<String>,
    size: Option<u32>,
    count: Option<u32>,
}

/// One record: parsed header, data slice and the offset after it.
struct Record {
    header: RecordHeader,
    data: Bytes,
    end: usize,
}

/// Parse the bag structure from the full file contents.
pub fn parse_bag(data: &Bytes) -> Result<BagIndex> {
    let version = parse_magic(data)?;
    let first = read_record(data, PREAMBLE_LEN)?;
    if first.header.op != Some(OP_BAG_HEADER) {
        return Err(PlaybackError::parse(
            "BagParser",
            format!(
                "Expected bag header record (op=0x03), got op={:?}",
                first.header.op
            ),
        ));
    }

    let header = BagHeader {
        version,
        index_pos: first.header.index_pos.unwrap_or(0),
        conn_count: first.header.conn_count.unwrap_or(0),
        chunk_count: first.header.chunk_count.unwrap_or(0),
    };

    let usable_index = header.index_pos >= first.end as u64 && header.index_pos < data.len() as u64;
    if usable_index {
        let (chunks, connections) = parse_index_section(data, header.index_pos as usize);
        if !chunks.is_empty() || header.chunk_count == 0 {
            debug!(
                context = "BagParser",
                chunks = chunks.len(),
                connections = connections.len(),
                "Parsed bag index section"
            );
            return Ok(BagIndex {
                header,
                chunks,
                connections,
                indexed: true,
            });
        }
    }

    let (chunks, connections) = scan_file(data, first.end)?;
    debug!(
        context = "BagParser",
        chunks = chunks.len(),
        connections = connections.len(),
        "Scanned unindexed bag"
    );
    Ok(BagIndex {
        header,
        chunks,
        connections,
        indexed: false,
    })
}

/// Parse the BAG magic string and return version.
fn parse_magic(data: &[u8]) -> Result<String> {
    if data.len() < PREAMBLE_LEN || !data.starts_with(MAGIC) {
        return Err(PlaybackError::parse("BagParser", "Invalid BAG magic"));
    }
    let version = String::from_utf8_lossy(&data[MAGIC.len()..PREAMBLE_LEN])
        .trim()
        .to_string();
    if version != "2.0" {
        return Err(PlaybackError::unsupported(format!("ROS bag version {version}")));
    }
    Ok(version)
}

/// Read a single BAG record: `<header_len: u32><header><data_len: u32><data>`
fn read_record(data: &Bytes, pos: usize) -> Result<Record> {
    let mut cursor = Cursor::new(data.get(pos..).unwrap_or(&[]));
    let header_len = cursor.read_u32::<LittleEndian>().map_err(|e| {
        PlaybackError::parse("BagParser", format!("Failed to read header_len at {pos}: {e}"))
    })? as usize;

    let header_start = pos + 4;
    let header_end = header_start + header_len;
    if header_end + 4 > data.len() {
        return Err(PlaybackError::parse(
            "BagParser",
            format!("Record header at {pos} overruns data"),
        ));
    }
    let header = parse_record_header(&data[header_start..header_end]);

    let data_len = Cursor::new(&data[header_end..header_end + 4])
        .read_u32::<LittleEndian>()
        .map_err(|e| PlaybackError::parse("BagParser", format!("Failed to read data_len: {e}")))?
        as usize;
    let data_start = header_end + 4;
    let data_end = data_start + data_len;
    if data_end > data.len() {
        return Err(PlaybackError::parse(
            "BagParser",
            format!("Record data at {pos} overruns data ({data_len} bytes)"),
        ));
    }

    Ok(Record {
        header,
        data: data.slice(data_start..data_end),
        end: data_end,
    })
}

/// Parse header bytes into named fields.
/// Format: sequence of `<field_len: u32><field_name>=<field_value>`
fn parse_record_header(header_bytes: &[u8]) -> RecordHeader {
    let mut cursor = Cursor::new(header_bytes);
    let mut fields = RecordHeader::default();

    while (cursor.position() as usize) < header_bytes.len() {
        let field_len = match cursor.read_u32::<LittleEndian>() {
            Ok(len) => len as usize,
            Err(_) => break,
        };
        if field_len == 0 {
            continue;
        }

        let start = cursor.position() as usize;
        let Some(field_bytes) = header_bytes.get(start..start + field_len) else {
            break;
        };
        cursor.set_position((start + field_len) as u64);

        if let Some(eq_pos) = field_bytes.iter().position(|&b| b == b'=') {
            parse_field(&mut fields, &field_bytes[..eq_pos], &field_bytes[eq_pos + 1..]);
        }
    }

    fields
}

fn le_u32(value: &[u8]) -> Option<u32> {
    Some(u32::from_le_bytes(value.get(..4)?.try_into().ok()?))
}

fn le_u64(value: &[u8]) -> Option<u64> {
    Some(u64::from_le_bytes(value.get(..8)?.try_into().ok()?))
}

fn ros_time(value: &[u8]) -> Option<Time> {
    Some(from_sec_nsec(le_u32(value)?, le_u32(value.get(4..)?)?))
}

fn text(value: &[u8]) -> Option<String> {
    Some(String::from_utf8_lossy(value).to_string())
}

/// Parse a single field from name and value bytes.
fn parse_field(fields: &mut RecordHeader, name: &[u8], value: &[u8]) {
    match name {
        b"op" if value.len() == 1 => fields.op = Some(value[0]),
        b"conn" => fields.conn = le_u32(value),
        b"time" => fields.time = ros_time(value),
        b"topic" => fields.topic = text(value),
        b"md5sum" => fields.md5sum = text(value),
        b"type" => fields.message_type = text(value),
        b"message_definition" => fields.message_definition = text(value),
        b"callerid" => fields.callerid = text(value),
        b"index_pos" => fields.index_pos = le_u64(value),
        b"conn_count" => fields.conn_count = le_u32(value),
        b"chunk_count" => fields.chunk_count = le_u32(value),
        b"chunk_pos" => fields.chunk_pos = le_u64(value),
        b"start_time" => fields.start_time = ros_time(value),
        b"end_time" => fields.end_time = ros_time(value),
        b"compression" => fields.compression = text(value),
        b"size" => fields.size = le_u32(value),
        b"count" => fields.count = le_u32(value),
        _ => {}
    }
}

/// Parse the index section to get chunk info and connections.
fn parse_index_section(
    data: &Bytes,
    index_pos: usize,
) -> (Vec<BagChunkInfo>, HashMap<u32, BagConnection>) {
    let mut chunks = Vec::new();
    let mut connections = HashMap::new();
    let mut pos = index_pos;

    while pos < data.len() {
        let record = match read_record(data, pos) {
            Ok(r) => r,
            Err(_) => break,
        };
        pos = record.end;

        match record.header.op {
            Some(OP_CONNECTION) => {
                if let Some(conn) = connection_from_record(&record) {
                    connections.insert(conn.conn_id, conn);
                }
            }
            Some(OP_CHUNK_INFO) => {
                if let Some(chunk) = chunk_info_from_record(&record, chunks.len()) {
                    chunks.push(chunk);
                }
            }
            _ => {}
        }
    }

    chunks.sort_by_key(|c| c.chunk_pos);
    for (ordinal, chunk) in chunks.iter_mut().enumerate() {
        chunk.ordinal = ordinal;
    }
    (chunks, connections)
}

/// Create a BagConnection from a connection record.
///
/// Type, md5sum and definition live in the record data, which uses the
/// same field encoding as a header.
fn connection_from_record(record: &Record) -> Option<BagConnection> {
    let data_fields = parse_record_header(&record.data);
    Some(BagConnection {
        conn_id: record.header.conn?,
        topic: record.header.topic.clone()?,
        message_type: data_fields.message_type?,
        md5sum: data_fields.md5sum.unwrap_or_default(),
        message_definition: data_fields.message_definition.unwrap_or_default(),
        caller_id: data_fields.callerid.unwrap_or_default(),
    })
}

/// Create a BagChunkInfo from a chunk info record.
///
/// The data holds `count` pairs of `conn: u32, count: u32`.
fn chunk_info_from_record(record: &Record, ordinal: usize) -> Option<BagChunkInfo> {
    let mut cursor = Cursor::new(&record.data[..]);
    let pairs = record
        .header
        .count
        .map(|c| c as usize)
        .unwrap_or(record.data.len() / 8);
    let mut connection_counts = Vec::with_capacity(pairs);
    for _ in 0..pairs {
        let (Ok(conn), Ok(count)) = (
            cursor.read_u32::<LittleEndian>(),
            cursor.read_u32::<LittleEndian>(),
        ) else {
            break;
        };
        connection_counts.push((conn, count));
    }

    Some(BagChunkInfo {
        ordinal,
        chunk_pos: record.header.chunk_pos?,
        start_time: record.header.start_time.unwrap_or(0),
        end_time: record.header.end_time.unwrap_or(0),
        connection_counts,
    })
}

/// Scan the data section when no index section is available.
///
/// Every chunk is decompressed once to learn its time span and connections.
fn scan_file(
    data: &Bytes,
    start: usize,
) -> Result<(Vec<BagChunkInfo>, HashMap<u32, BagConnection>)> {
    let mut chunks = Vec::new();
    let mut connections = HashMap::new();
    let mut pos = start;

    while pos < data.len() {
        let record_start = pos;
        let record = match read_record(data, pos) {
            Ok(r) => r,
            Err(_) => break,
        };
        pos = record.end;

        match record.header.op {
            Some(OP_CONNECTION) => {
                if let Some(conn) = connection_from_record(&record) {
                    connections.insert(conn.conn_id, conn);
                }
            }
            Some(OP_CHUNK) => {
                let Ok(contents) = decompress_chunk(&record) else {
                    break;
                };
                let parsed = parse_chunk(&contents);
                for conn in parsed.connections {
                    connections.entry(conn.conn_id).or_insert(conn);
                }
                let mut counts: HashMap<u32, u32> = HashMap::new();
                for r in &parsed.records {
                    *counts.entry(r.connection_id).or_default() += 1;
                }
                let mut connection_counts: Vec<(u32, u32)> = counts.into_iter().collect();
                connection_counts.sort_unstable();
                chunks.push(BagChunkInfo {
                    ordinal: chunks.len(),
                    chunk_pos: record_start as u64,
                    start_time: parsed.records.iter().map(|r| r.log_time).min().unwrap_or(0),
                    end_time: parsed.records.iter().map(|r| r.log_time).max().unwrap_or(0),
                    connection_counts,
                });
            }
            _ => {}
        }
    }

    Ok((chunks, connections))
}

/// Read and decompress the chunk record at `chunk_pos`.
pub fn read_chunk(data: &Bytes, chunk_pos: u64) -> Result<Bytes> {
    let record = read_record(data, chunk_pos as usize)?;
    if record.header.op != Some(OP_CHUNK) {
        return Err(PlaybackError::parse(
            "BagParser::read_chunk",
            format!(
                "Expected chunk record (op=0x05), got op={:?}",
                record.header.op
            ),
        ));
    }
    decompress_chunk(&record)
}

fn decompress_chunk(record: &Record) -> Result<Bytes> {
    let compression = record.header.compression.as_deref().unwrap_or("none");
    let size_hint = record.header.size.unwrap_or(0) as usize;

    let contents = match compression {
        "none" => return Ok(record.data.clone()),
        "bz2" => {
            let mut out = Vec::with_capacity(size_hint);
            bzip2::read::BzDecoder::new(&record.data[..])
                .read_to_end(&mut out)
                .map_err(|e| {
                    PlaybackError::parse(
                        "BagParser::read_chunk",
                        format!("BZ2 decompression failed: {e}"),
                    )
                })?;
            out
        }
        "lz4" => {
            let mut out = Vec::with_capacity(size_hint);
            lz4_flex::frame::FrameDecoder::new(&record.data[..])
                .read_to_end(&mut out)
                .map_err(|e| {
                    PlaybackError::parse(
                        "BagParser::read_chunk",
                        format!("LZ4 decompression failed: {e}"),
                    )
                })?;
            out
        }
        other => {
            return Err(PlaybackError::unsupported(format!(
                "ROS bag chunk compression '{other}'"
            )))
        }
    };

    if size_hint != 0 && contents.len() != size_hint {
        return Err(PlaybackError::parse(
            "BagParser::read_chunk",
            format!(
                "Decompressed size {} does not match header {}",
                contents.len(),
                size_hint
            ),
        ));
    }
    Ok(Bytes::from(contents))
}

/// Records and connections found inside a chunk.
#[derive(Debug, Default)]
pub struct ParsedChunk {
    /// Message records in on-disk order
    pub records: Vec<ChunkRecord>,
    /// Connection records embedded in the chunk
    pub connections: Vec<BagConnection>,
}

/// Parse message data records from decompressed chunk contents.
///
/// Parsing stops at the first malformed record; everything before it is
/// returned.
pub fn parse_chunk(contents: &Bytes) -> ParsedChunk {
    let mut parsed = ParsedChunk::default();
    let mut pos = 0;

    while pos < contents.len() {
        let record = match read_record(contents, pos) {
            Ok(r) => r,
            Err(_) => break,
        };
        pos = record.end;

        match record.header.op {
            Some(OP_MSG_DATA) => {
                let (Some(conn), Some(time)) = (record.header.conn, record.header.time) else {
                    continue;
                };
                parsed.records.push(ChunkRecord {
                    connection_id: conn,
                    log_time: time,
                    publish_time: None,
                    data: record.data,
                });
            }
            Some(OP_CONNECTION) => {
                if let Some(conn) = connection_from_record(&record) {
                    parsed.connections.push(conn);
                }
            }
            _ => {}
        }
    }

    parsed
}
