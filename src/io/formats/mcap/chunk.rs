// SPDX-FileCopyrightText: 2026 ArcheBase
//
// SPDX-License-Identifier: MulanPSL-2.0

//! MCAP chunk decompression and record parsing.
//!
//! Chunks are located through the chunk indexes of the summary section and
//! decoded straight from the mapped file. Uncompressed chunks are sliced
//! without copying.

use std::io::{Cursor, Read};

use byteorder::{LittleEndian, ReadBytesExt};
use bytes::Bytes;

use crate::core::{PlaybackError, Result};
use crate::io::merge::ChunkRecord;

use super::constants::{
    CHUNK_CRC_OFFSET, MCAP_MAGIC, MESSAGE_HEADER_LEN, OP_HEADER, OP_MESSAGE, RECORD_PREFIX_LEN,
};

/// Location of a chunk in the file, taken from its chunk index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkLocation {
    /// Offset of the chunk record opcode
    pub chunk_start_offset: u64,
    /// Compression name ("", "zstd", "lz4")
    pub compression: String,
    /// Size of the compressed records
    pub compressed_size: u64,
    /// Size of the records after decompression
    pub uncompressed_size: u64,
}

impl From<&mcap::records::ChunkIndex> for ChunkLocation {
    fn from(index: &mcap::records::ChunkIndex) -> Self {
        Self {
            chunk_start_offset: index.chunk_start_offset,
            compression: index.compression.clone(),
            compressed_size: index.compressed_size,
            uncompressed_size: index.uncompressed_size,
        }
    }
}

/// Read, decompress and CRC-check the records of one chunk.
pub fn read_chunk(data: &Bytes, location: &ChunkLocation) -> Result<Bytes> {
    let overflow = || {
        PlaybackError::parse(
            "McapChunk",
            format!(
                "Chunk index out of range: offset {}, size {}",
                location.chunk_start_offset, location.compressed_size
            ),
        )
    };
    let header_size = 8 + 8 + 8 + 4 + 4 + location.compression.len() + 8;
    let body_start = usize::try_from(location.chunk_start_offset)
        .ok()
        .and_then(|offset| offset.checked_add(RECORD_PREFIX_LEN))
        .ok_or_else(overflow)?;
    let data_start = body_start.checked_add(header_size).ok_or_else(overflow)?;
    let data_end = usize::try_from(location.compressed_size)
        .ok()
        .and_then(|size| data_start.checked_add(size))
        .ok_or_else(overflow)?;

    if data_end > data.len() {
        return Err(PlaybackError::parse(
            "McapChunk",
            format!(
                "Chunk data exceeds file: {}..{} > {}",
                data_start,
                data_end,
                data.len()
            ),
        ));
    }

    let crc_pos = body_start + CHUNK_CRC_OFFSET;
    let expected_crc = Cursor::new(&data[crc_pos..crc_pos + 4])
        .read_u32::<LittleEndian>()
        .map_err(|e| PlaybackError::parse("McapChunk", format!("Failed to read CRC: {e}")))?;

    let compressed = data.slice(data_start..data_end);
    let records = match location.compression.as_str() {
        "" | "none" => compressed,
        "zstd" | "zst" => {
            zstd::stream::decode_all(&compressed[..])
                .map(Bytes::from)
                .map_err(|e| {
                    PlaybackError::parse("McapChunk", format!("Zstd decompression failed: {e}"))
                })?
        }
        "lz4" => {
            let mut out = Vec::new();
            lz4_flex::frame::FrameDecoder::new(&compressed[..])
                .read_to_end(&mut out)
                .map_err(|e| {
                    PlaybackError::parse("McapChunk", format!("LZ4 decompression failed: {e}"))
                })?;
            Bytes::from(out)
        }
        other => {
            return Err(PlaybackError::unsupported(format!(
                "MCAP chunk compression '{other}'"
            )))
        }
    };

    if records.len() as u64 != location.uncompressed_size {
        return Err(PlaybackError::parse(
            "McapChunk",
            format!(
                "Decompressed size {} does not match index {}",
                records.len(),
                location.uncompressed_size
            ),
        ));
    }

    if expected_crc != 0 {
        let actual = crc32fast::hash(&records);
        if actual != expected_crc {
            return Err(PlaybackError::parse(
                "McapChunk",
                format!("CRC mismatch: expected {expected_crc:#010x}, got {actual:#010x}"),
            ));
        }
    }

    Ok(records)
}

/// Extract message records from decompressed chunk contents.
pub fn parse_records(chunk: &Bytes) -> Result<Vec<ChunkRecord>> {
    let mut records = Vec::new();
    let mut pos = 0usize;

    while pos + RECORD_PREFIX_LEN <= chunk.len() {
        let mut cursor = Cursor::new(&chunk[pos..]);
        let op = cursor.read_u8()?;
        let record_len = cursor.read_u64::<LittleEndian>()? as usize;

        let body_start = pos + RECORD_PREFIX_LEN;
        let body_end = body_start
            .checked_add(record_len)
            .filter(|end| *end <= chunk.len())
            .ok_or_else(|| {
                PlaybackError::parse(
                    "McapChunk",
                    format!("Record at {pos} overruns chunk ({record_len} bytes)"),
                )
            })?;
        pos = body_end;

        if op != OP_MESSAGE {
            continue;
        }
        if record_len < MESSAGE_HEADER_LEN {
            return Err(PlaybackError::parse(
                "McapChunk",
                format!("Message record too short: {record_len} bytes"),
            ));
        }

        let mut msg = Cursor::new(&chunk[body_start..body_end]);
        let channel_id = msg.read_u16::<LittleEndian>()?;
        let _sequence = msg.read_u32::<LittleEndian>()?;
        let log_time = msg.read_u64::<LittleEndian>()?;
        let publish_time = msg.read_u64::<LittleEndian>()?;

        records.push(ChunkRecord {
            connection_id: channel_id as u32,
            log_time,
            publish_time: Some(publish_time),
            data: chunk.slice(body_start + MESSAGE_HEADER_LEN..body_end),
        });
    }

    Ok(records)
}

/// Profile and library strings from the header record, if present.
pub fn read_header(data: &[u8]) -> Option<(String, String)> {
    if !data.starts_with(MCAP_MAGIC) {
        return None;
    }
    let mut cursor = Cursor::new(&data[MCAP_MAGIC.len()..]);
    if cursor.read_u8().ok()? != OP_HEADER {
        return None;
    }
    let _len = cursor.read_u64::<LittleEndian>().ok()?;
    let profile = read_string(&mut cursor)?;
    let library = read_string(&mut cursor)?;
    Some((profile, library))
}

fn read_string(cursor: &mut Cursor<&[u8]>) -> Option<String> {
    let len = cursor.read_u32::<LittleEndian>().ok()? as usize;
    let remaining = cursor.get_ref().len().saturating_sub(cursor.position() as usize);
    if len > remaining {
        return None;
    }
    let mut buf = vec![0u8; len];
    cursor.read_exact(&mut buf).ok()?;
    String::from_utf8(buf).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::WriteBytesExt;
    use std::io::Write;

    fn message_record(channel: u16, log_time: u64, payload: &[u8]) -> Vec<u8> {
        let mut out = vec![OP_MESSAGE];
        out.write_u64::<LittleEndian>((MESSAGE_HEADER_LEN + payload.len()) as u64)
            .unwrap();
        out.write_u16::<LittleEndian>(channel).unwrap();
        out.write_u32::<LittleEndian>(0).unwrap();
        out.write_u64::<LittleEndian>(log_time).unwrap();
        out.write_u64::<LittleEndian>(log_time + 1).unwrap();
        out.write_all(payload).unwrap();
        out
    }

    fn chunk_file(records: &[u8], compression: &str, compressed: &[u8], crc: u32) -> Bytes {
        let mut out = MCAP_MAGIC.to_vec();
        let offset = out.len();
        let body_len = 8 + 8 + 8 + 4 + 4 + compression.len() + 8 + compressed.len();
        out.push(0x06);
        out.write_u64::<LittleEndian>(body_len as u64).unwrap();
        out.write_u64::<LittleEndian>(0).unwrap();
        out.write_u64::<LittleEndian>(0).unwrap();
        out.write_u64::<LittleEndian>(records.len() as u64).unwrap();
        out.write_u32::<LittleEndian>(crc).unwrap();
        out.write_u32::<LittleEndian>(compression.len() as u32).unwrap();
        out.write_all(compression.as_bytes()).unwrap();
        out.write_u64::<LittleEndian>(compressed.len() as u64).unwrap();
        out.write_all(compressed).unwrap();
        assert_eq!(offset, 8);
        Bytes::from(out)
    }

    fn location(compression: &str, compressed: usize, uncompressed: usize) -> ChunkLocation {
        ChunkLocation {
            chunk_start_offset: 8,
            compression: compression.to_string(),
            compressed_size: compressed as u64,
            uncompressed_size: uncompressed as u64,
        }
    }

    #[test]
    fn test_uncompressed_chunk_is_sliced() {
        let mut records = message_record(1, 10, b"hello");
        records.extend(message_record(2, 5, b"world"));
        let crc = crc32fast::hash(&records);
        let file = chunk_file(&records, "", &records, crc);

        let chunk = read_chunk(&file, &location("", records.len(), records.len())).unwrap();
        let parsed = parse_records(&chunk).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].connection_id, 1);
        assert_eq!(parsed[0].log_time, 10);
        assert_eq!(parsed[0].publish_time, Some(11));
        assert_eq!(&parsed[0].data[..], b"hello");
        assert_eq!(parsed[1].log_time, 5);
    }

    #[test]
    fn test_zstd_chunk() {
        let records = message_record(3, 42, b"payload");
        let compressed = zstd::bulk::compress(&records, 3).unwrap();
        let file = chunk_file(&records, "zstd", &compressed, 0);

        let chunk =
            read_chunk(&file, &location("zstd", compressed.len(), records.len())).unwrap();
        let parsed = parse_records(&chunk).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(&parsed[0].data[..], b"payload");
    }

    #[test]
    fn test_lz4_frame_chunk() {
        let records = message_record(3, 42, b"payload");
        let mut encoder = lz4_flex::frame::FrameEncoder::new(Vec::new());
        encoder.write_all(&records).unwrap();
        let compressed = encoder.finish().unwrap();
        let file = chunk_file(&records, "lz4", &compressed, 0);

        let chunk = read_chunk(&file, &location("lz4", compressed.len(), records.len())).unwrap();
        assert_eq!(parse_records(&chunk).unwrap().len(), 1);
    }

    #[test]
    fn test_crc_mismatch() {
        let records = message_record(1, 1, b"x");
        let file = chunk_file(&records, "", &records, 0xdead_beef);
        let err = read_chunk(&file, &location("", records.len(), records.len())).unwrap_err();
        assert!(err.to_string().contains("CRC mismatch"));
    }

    #[test]
    fn test_chunk_past_end_of_file() {
        let records = message_record(1, 1, b"x");
        let file = chunk_file(&records, "", &records, 0);
        let err = read_chunk(&file, &location("", records.len() + 100, records.len())).unwrap_err();
        assert!(err.to_string().contains("exceeds file"));
    }

    #[test]
    fn test_chunk_index_overflow_is_an_error() {
        let records = message_record(1, 1, b"x");
        let file = chunk_file(&records, "", &records, 0);

        let mut bad_offset = location("", records.len(), records.len());
        bad_offset.chunk_start_offset = u64::MAX - 4;
        let err = read_chunk(&file, &bad_offset).unwrap_err();
        assert!(matches!(err, PlaybackError::Parse { .. }));

        let bad_size = location("", usize::MAX - 8, records.len());
        assert!(matches!(
            read_chunk(&file, &bad_size),
            Err(PlaybackError::Parse { .. })
        ));
    }

    #[test]
    fn test_index_size_mismatch_does_not_preallocate() {
        let records = message_record(3, 42, b"payload");
        let compressed = zstd::bulk::compress(&records, 3).unwrap();
        let file = chunk_file(&records, "zstd", &compressed, 0);
        let err = read_chunk(&file, &location("zstd", compressed.len(), usize::MAX)).unwrap_err();
        assert!(err.to_string().contains("does not match index"));
    }

    #[test]
    fn test_unsupported_compression() {
        let records = message_record(1, 1, b"x");
        let file = chunk_file(&records, "brotli", &records, 0);
        let err =
            read_chunk(&file, &location("brotli", records.len(), records.len())).unwrap_err();
        assert!(matches!(err, PlaybackError::Unsupported { .. }));
    }

    #[test]
    fn test_truncated_record() {
        let mut records = message_record(1, 1, b"abcdef");
        records.truncate(records.len() - 3);
        let err = parse_records(&Bytes::from(records)).unwrap_err();
        assert!(err.to_string().contains("overruns"));
    }

    #[test]
    fn test_read_header() {
        let mut data = MCAP_MAGIC.to_vec();
        data.push(OP_HEADER);
        data.write_u64::<LittleEndian>(4 + 4 + 4 + 3).unwrap();
        data.write_u32::<LittleEndian>(4).unwrap();
        data.write_all(b"ros1").unwrap();
        data.write_u32::<LittleEndian>(3).unwrap();
        data.write_all(b"lib").unwrap();
        assert_eq!(read_header(&data), Some(("ros1".into(), "lib".into())));
        assert_eq!(read_header(b"not mcap"), None);
    }
}
