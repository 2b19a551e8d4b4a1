// SPDX-FileCopyrightText: 2026 ArcheBase
//
// SPDX-License-Identifier: MulanPSL-2.0

//! PX4 ULog parser.
//!
//! # File Structure
//!
//! - Header: magic `ULog\x01\x12\x35`, version (u8), start timestamp (u64 µs)
//! - Messages: `<msg_size: u16><msg_type: u8><payload: msg_size bytes>`
//!
//! Definition messages (`B`, `F`, `I`, `M`, `P`) describe the log; data
//! messages (`A`, `R`, `D`, `L`, `C`, `O`, `S`) carry subscriptions and
//! samples. All integers are little-endian.

use std::collections::{BTreeMap, HashMap};
use std::io::Cursor;

use byteorder::{LittleEndian, ReadBytesExt};
use bytes::Bytes;
use serde_json::{Map, Number, Value};

use crate::core::{PlaybackError, Result, Time};
use crate::io::detection::ULOG_MAGIC;
use crate::io::merge::ChunkRecord;

/// Header length: magic (7), version (1), timestamp (8).
pub const HEADER_LEN: usize = 16;

/// Connection id used for `L` and `C` log records.
pub const LOG_CONNECTION: u32 = u32::MAX;

/// Deepest chain of nested formats accepted.
pub const MAX_NESTING: usize = 32;

const MSG_FLAG_BITS: u8 = b'B';
const MSG_FORMAT: u8 = b'F';
const MSG_INFO: u8 = b'I';
const MSG_INFO_MULTI: u8 = b'M';
const MSG_PARAMETER: u8 = b'P';
const MSG_ADD_LOGGED: u8 = b'A';
const MSG_REMOVE_LOGGED: u8 = b'R';
const MSG_DATA: u8 = b'D';
const MSG_LOGGING: u8 = b'L';
const MSG_LOGGING_TAGGED: u8 = b'C';
const MSG_DROPOUT: u8 = b'O';

/// Convert ULog microseconds to nanoseconds.
pub fn micros_to_time(micros: u64) -> Time {
    micros.saturating_mul(1_000)
}

/// Primitive or nested field type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldType {
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Float,
    Double,
    Bool,
    Char,
    /// Another format, by name
    Nested(String),
}

impl FieldType {
    fn parse(name: &str) -> Self {
        match name {
            "int8_t" => FieldType::Int8,
            "uint8_t" => FieldType::UInt8,
            "int16_t" => FieldType::Int16,
            "uint16_t" => FieldType::UInt16,
            "int32_t" => FieldType::Int32,
            "uint32_t" => FieldType::UInt32,
            "int64_t" => FieldType::Int64,
            "uint64_t" => FieldType::UInt64,
            "float" => FieldType::Float,
            "double" => FieldType::Double,
            "bool" => FieldType::Bool,
            "char" => FieldType::Char,
            other => FieldType::Nested(other.to_string()),
        }
    }
}

/// One field of a message format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatField {
    /// Field name
    pub name: String,
    /// Element type
    pub ty: FieldType,
    /// Array length, for `type[n] name` fields
    pub array_len: Option<usize>,
}

impl FormatField {
    fn is_padding(&self) -> bool {
        self.name.starts_with("_padding")
    }
}

/// Parsed `F` message: a named list of fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageFormat {
    /// Format name (e.g., "vehicle_attitude")
    pub name: String,
    /// Fields in declaration order
    pub fields: Vec<FormatField>,
    /// Original definition text
    pub definition: String,
}

/// Parse a format definition `name:type field;type[n] field;...`.
pub fn parse_format(text: &str) -> Result<MessageFormat> {
    let (name, body) = text
        .split_once(':')
        .ok_or_else(|| PlaybackError::parse("ULogFormat", format!("Missing ':' in {text:?}")))?;

    let mut fields = Vec::new();
    for decl in body.split(';').map(str::trim).filter(|d| !d.is_empty()) {
        let (ty, field_name) = decl.split_once(' ').ok_or_else(|| {
            PlaybackError::parse("ULogFormat", format!("Bad field declaration {decl:?}"))
        })?;
        let (ty, array_len) = match ty.split_once('[') {
            Some((base, rest)) => {
                let len = rest.trim_end_matches(']').parse::<usize>().map_err(|e| {
                    PlaybackError::parse("ULogFormat", format!("Bad array length in {decl:?}: {e}"))
                })?;
                (base, Some(len))
            }
            None => (ty, None),
        };
        fields.push(FormatField {
            name: field_name.trim().to_string(),
            ty: FieldType::parse(ty),
            array_len,
        });
    }

    Ok(MessageFormat {
        name: name.to_string(),
        fields,
        definition: text.to_string(),
    })
}

/// A subscription created by an `A` message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    /// Message id used by `D` records
    pub msg_id: u16,
    /// Instance number for multi-instance topics
    pub multi_id: u8,
    /// Format name
    pub format_name: String,
}

impl Subscription {
    /// Topic name: `/name`, or `/name.N` for instances other than the first.
    pub fn topic(&self) -> String {
        if self.multi_id == 0 {
            format!("/{}", self.format_name)
        } else {
            format!("/{}.{}", self.format_name, self.multi_id)
        }
    }
}

/// Everything read from a ULog file.
#[derive(Debug, Default)]
pub struct ULogIndex {
    /// File format version
    pub version: u8,
    /// Start timestamp from the header
    pub start_time: Time,
    /// Formats by name
    pub formats: HashMap<String, MessageFormat>,
    /// Subscriptions by message id, in order of appearance
    pub subscriptions: BTreeMap<u16, Subscription>,
    /// Info (`I`, `M`) and parameter (`P`) values as text
    pub info: BTreeMap<String, String>,
    /// Data and log records, sorted by time (stable)
    pub records: Vec<ChunkRecord>,
    /// Number of dropouts and their total duration in milliseconds
    pub dropouts: (u32, u64),
    /// Set when the file ended in the middle of a message
    pub truncated: bool,
    /// `F` records that were skipped, with the reason
    pub format_errors: Vec<String>,
}

/// Parse a ULog file into an in-memory index.
pub fn parse_ulog(data: &Bytes) -> Result<ULogIndex> {
    if data.len() < HEADER_LEN || !data.starts_with(ULOG_MAGIC) {
        return Err(PlaybackError::parse("ULogParser", "Invalid ULog magic"));
    }
    let mut header = Cursor::new(&data[ULOG_MAGIC.len()..HEADER_LEN]);
    let version = header.read_u8()?;
    let start_micros = header.read_u64::<LittleEndian>()?;

    let mut index = ULogIndex {
        version,
        start_time: micros_to_time(start_micros),
        ..Default::default()
    };

    let mut pos = HEADER_LEN;
    while pos + 3 <= data.len() {
        let msg_size = usize::from(u16::from_le_bytes([data[pos], data[pos + 1]]));
        let msg_type = data[pos + 2];
        let body_start = pos + 3;
        let body_end = body_start + msg_size;
        if body_end > data.len() {
            index.truncated = true;
            break;
        }
        pos = body_end;
        let body = data.slice(body_start..body_end);

        match msg_type {
            MSG_FORMAT => {
                let text = String::from_utf8_lossy(&body).to_string();
                match parse_format(&text) {
                    Ok(format) => {
                        index.formats.insert(format.name.clone(), format);
                    }
                    Err(e) => index.format_errors.push(e.to_string()),
                }
            }
            MSG_INFO => {
                if let Some((key, value)) = parse_key_value(&body, 0) {
                    index.info.insert(key, value);
                }
            }
            MSG_INFO_MULTI => {
                // is_continued byte precedes the key
                if let Some((key, value)) = parse_key_value(&body, 1) {
                    index
                        .info
                        .entry(key)
                        .and_modify(|v| v.push_str(&value))
                        .or_insert(value);
                }
            }
            MSG_PARAMETER => {
                if let Some((key, value)) = parse_key_value(&body, 0) {
                    index.info.insert(format!("param.{key}"), value);
                }
            }
            MSG_ADD_LOGGED => {
                if body.len() < 3 {
                    continue;
                }
                let multi_id = body[0];
                let msg_id = u16::from_le_bytes([body[1], body[2]]);
                let format_name = String::from_utf8_lossy(&body[3..]).to_string();
                index.subscriptions.insert(
                    msg_id,
                    Subscription {
                        msg_id,
                        multi_id,
                        format_name,
                    },
                );
            }
            MSG_DATA => {
                if body.len() < 2 + 8 {
                    continue;
                }
                let msg_id = u16::from_le_bytes([body[0], body[1]]);
                let micros = u64::from_le_bytes(body[2..10].try_into().unwrap_or_default());
                index.records.push(ChunkRecord {
                    connection_id: msg_id as u32,
                    log_time: micros_to_time(micros),
                    publish_time: None,
                    data: body.slice(2..),
                });
            }
            MSG_LOGGING | MSG_LOGGING_TAGGED => {
                let ts_offset = if msg_type == MSG_LOGGING { 1 } else { 3 };
                let Some(ts) = body.get(ts_offset..ts_offset + 8) else {
                    continue;
                };
                let micros = u64::from_le_bytes(ts.try_into().unwrap_or_default());
                let mut record_data = vec![msg_type];
                record_data.extend_from_slice(&body);
                index.records.push(ChunkRecord {
                    connection_id: LOG_CONNECTION,
                    log_time: micros_to_time(micros),
                    publish_time: None,
                    data: Bytes::from(record_data),
                });
            }
            MSG_DROPOUT => {
                if body.len() >= 2 {
                    index.dropouts.0 += 1;
                    index.dropouts.1 += u16::from_le_bytes([body[0], body[1]]) as u64;
                }
            }
            MSG_FLAG_BITS | MSG_REMOVE_LOGGED => {}
            _ => {}
        }
    }

    drop_invalid_formats(&mut index);

    // Stable: equal times keep file order
    index.records.sort_by_key(|r| r.log_time);
    Ok(index)
}

/// Remove formats that contain themselves or nest deeper than
/// [`MAX_NESTING`]; each removal is recorded in `format_errors`.
fn drop_invalid_formats(index: &mut ULogIndex) {
    let mut names: Vec<String> = index.formats.keys().cloned().collect();
    names.sort();
    let mut known = HashMap::new();
    let invalid: Vec<(String, PlaybackError)> = names
        .into_iter()
        .filter_map(|name| {
            nesting_depth(&index.formats, &name, &mut Vec::new(), &mut known)
                .err()
                .map(|e| (name, e))
        })
        .collect();
    for (name, error) in invalid {
        index.formats.remove(&name);
        index.format_errors.push(error.to_string());
    }
}

fn nesting_depth(
    formats: &HashMap<String, MessageFormat>,
    name: &str,
    stack: &mut Vec<String>,
    known: &mut HashMap<String, usize>,
) -> Result<usize> {
    if let Some(depth) = known.get(name) {
        return Ok(*depth);
    }
    if stack.iter().any(|n| n == name) {
        return Err(PlaybackError::parse(
            "ULogFormat",
            format!("Format {name} contains itself"),
        ));
    }
    let Some(format) = formats.get(name) else {
        return Ok(0);
    };
    if stack.len() > MAX_NESTING {
        return Err(too_deep(name));
    }

    stack.push(name.to_string());
    let mut depth = 0;
    let mut outcome = Ok(());
    for field in &format.fields {
        if let FieldType::Nested(inner) = &field.ty {
            match nesting_depth(formats, inner, stack, known) {
                Ok(d) => depth = depth.max(d + 1),
                Err(e) => {
                    outcome = Err(e);
                    break;
                }
            }
        }
    }
    stack.pop();
    outcome?;

    if depth > MAX_NESTING {
        return Err(too_deep(name));
    }
    known.insert(name.to_string(), depth);
    Ok(depth)
}

fn too_deep(name: &str) -> PlaybackError {
    PlaybackError::parse(
        "ULogFormat",
        format!("Format {name} nests deeper than {MAX_NESTING} levels"),
    )
}

/// `data[pos..pos + len]`, or a parse error when the message is too short.
fn take<'a>(data: &'a [u8], pos: &mut usize, len: usize) -> Result<&'a [u8]> {
    let bytes = pos
        .checked_add(len)
        .and_then(|end| data.get(*pos..end))
        .ok_or_else(|| PlaybackError::parse("ULogDecoder", "Message shorter than its format"))?;
    *pos += len;
    Ok(bytes)
}

/// Parse `<key_len: u8><key: "type name"><value>` starting at `offset`.
fn parse_key_value(body: &[u8], offset: usize) -> Option<(String, String)> {
    let key_len = *body.get(offset)? as usize;
    let key_start = offset + 1;
    let key = std::str::from_utf8(body.get(key_start..key_start + key_len)?).ok()?;
    let value = body.get(key_start + key_len..)?;

    let (ty, name) = key.split_once(' ')?;
    let field = parse_format(&format!("kv:{ty} {name}")).ok()?.fields.pop()?;
    let mut pos = 0;
    let decoded = decode_field(&HashMap::new(), &field, value, &mut pos, 0).ok()?;
    let text = match decoded {
        Value::String(s) => s,
        other => other.to_string(),
    };
    Some((name.to_string(), text))
}

fn read_scalar(ty: &FieldType, data: &[u8], pos: &mut usize) -> Result<Value> {
    let width = match ty {
        FieldType::Int8 | FieldType::UInt8 | FieldType::Bool | FieldType::Char => 1,
        FieldType::Int16 | FieldType::UInt16 => 2,
        FieldType::Int32 | FieldType::UInt32 | FieldType::Float => 4,
        FieldType::Int64 | FieldType::UInt64 | FieldType::Double => 8,
        FieldType::Nested(name) => {
            return Err(PlaybackError::parse(
                "ULogDecoder",
                format!("{name} is not a scalar type"),
            ))
        }
    };
    let bytes = take(data, pos, width)?;

    let mut c = Cursor::new(bytes);
    let value = match ty {
        FieldType::Int8 => Value::from(c.read_i8()?),
        FieldType::UInt8 => Value::from(c.read_u8()?),
        FieldType::Int16 => Value::from(c.read_i16::<LittleEndian>()?),
        FieldType::UInt16 => Value::from(c.read_u16::<LittleEndian>()?),
        FieldType::Int32 => Value::from(c.read_i32::<LittleEndian>()?),
        FieldType::UInt32 => Value::from(c.read_u32::<LittleEndian>()?),
        FieldType::Int64 => Value::from(c.read_i64::<LittleEndian>()?),
        FieldType::UInt64 => Value::from(c.read_u64::<LittleEndian>()?),
        FieldType::Float => float(c.read_f32::<LittleEndian>()? as f64),
        FieldType::Double => float(c.read_f64::<LittleEndian>()?),
        FieldType::Bool => Value::Bool(bytes[0] != 0),
        FieldType::Char => Value::String((bytes[0] as char).to_string()),
        FieldType::Nested(_) => Value::Null,
    };
    Ok(value)
}

/// NaN and infinities have no JSON number form.
fn float(v: f64) -> Value {
    Number::from_f64(v).map(Value::Number).unwrap_or(Value::Null)
}

fn decode_element(
    formats: &HashMap<String, MessageFormat>,
    ty: &FieldType,
    data: &[u8],
    pos: &mut usize,
    depth: usize,
) -> Result<Value> {
    match ty {
        FieldType::Nested(name) => {
            if depth >= MAX_NESTING {
                return Err(too_deep(name));
            }
            let format = formats.get(name).ok_or_else(|| {
                PlaybackError::parse("ULogDecoder", format!("Unknown nested format {name}"))
            })?;
            decode_fields(formats, format, data, pos, depth + 1)
        }
        scalar => read_scalar(scalar, data, pos),
    }
}

fn decode_field(
    formats: &HashMap<String, MessageFormat>,
    field: &FormatField,
    data: &[u8],
    pos: &mut usize,
    depth: usize,
) -> Result<Value> {
    match (field.array_len, &field.ty) {
        (Some(len), FieldType::Char) => {
            let bytes = take(data, pos, len)?;
            let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
            Ok(Value::String(String::from_utf8_lossy(&bytes[..end]).to_string()))
        }
        (Some(len), ty) => {
            // Every element takes at least one byte
            let mut items = Vec::with_capacity(len.min(data.len().saturating_sub(*pos)));
            for _ in 0..len {
                let before = *pos;
                items.push(decode_element(formats, ty, data, pos, depth)?);
                if *pos == before {
                    return Err(PlaybackError::parse(
                        "ULogDecoder",
                        format!("Array {} has empty elements", field.name),
                    ));
                }
            }
            Ok(Value::Array(items))
        }
        (None, ty) => decode_element(formats, ty, data, pos, depth),
    }
}

fn decode_fields(
    formats: &HashMap<String, MessageFormat>,
    format: &MessageFormat,
    data: &[u8],
    pos: &mut usize,
    depth: usize,
) -> Result<Value> {
    let mut object = Map::new();
    for field in &format.fields {
        if field.is_padding() {
            let width = field_size(formats, field, depth).unwrap_or(0);
            // Trailing padding may be cut from the end of a message
            *pos = pos.saturating_add(width).min(data.len());
            continue;
        }
        let value = decode_field(formats, field, data, pos, depth)?;
        object.insert(field.name.clone(), value);
    }
    Ok(Value::Object(object))
}

fn field_size(
    formats: &HashMap<String, MessageFormat>,
    field: &FormatField,
    depth: usize,
) -> Option<usize> {
    let element = match &field.ty {
        FieldType::Int8 | FieldType::UInt8 | FieldType::Bool | FieldType::Char => 1,
        FieldType::Int16 | FieldType::UInt16 => 2,
        FieldType::Int32 | FieldType::UInt32 | FieldType::Float => 4,
        FieldType::Int64 | FieldType::UInt64 | FieldType::Double => 8,
        FieldType::Nested(_) if depth >= MAX_NESTING => return None,
        FieldType::Nested(name) => formats
            .get(name)?
            .fields
            .iter()
            .map(|f| field_size(formats, f, depth + 1))
            .try_fold(0usize, |total, size| total.checked_add(size?))?,
    };
    element.checked_mul(field.array_len.unwrap_or(1))
}

/// Decode a `D` record payload (after the message id) with its format.
pub fn decode_data(
    formats: &HashMap<String, MessageFormat>,
    format: &MessageFormat,
    data: &[u8],
) -> Result<Value> {
    let mut pos = 0;
    decode_fields(formats, format, data, &mut pos, 0)
}

/// Decode an `L` or `C` record as stored by [`parse_ulog`].
pub fn decode_log(data: &[u8]) -> Result<Value> {
    let short = || PlaybackError::parse("ULogDecoder", "Log record too short");
    let (&msg_type, body) = data.split_first().ok_or_else(short)?;
    let level = *body.first().ok_or_else(short)?;

    let mut object = Map::new();
    object.insert("level".to_string(), Value::from(level_name(level)));
    let text_start = if msg_type == MSG_LOGGING_TAGGED {
        let tag = body.get(1..3).ok_or_else(short)?;
        object.insert(
            "tag".to_string(),
            Value::from(u16::from_le_bytes([tag[0], tag[1]])),
        );
        11
    } else {
        9
    };
    let text = body.get(text_start..).ok_or_else(short)?;
    object.insert(
        "message".to_string(),
        Value::String(String::from_utf8_lossy(text).to_string()),
    );
    Ok(Value::Object(object))
}

/// Syslog-style level names used by PX4 (`'0'` emergency ... `'7'` debug).
fn level_name(level: u8) -> &'static str {
    match level {
        b'0' | 0 => "EMERGENCY",
        b'1' | 1 => "ALERT",
        b'2' | 2 => "CRITICAL",
        b'3' | 3 => "ERROR",
        b'4' | 4 => "WARNING",
        b'5' | 5 => "NOTICE",
        b'6' | 6 => "INFO",
        _ => "DEBUG",
    }
}
