// SPDX-FileCopyrightText: 2026 ArcheBase
//
// SPDX-License-Identifier: MulanPSL-2.0

//! Format detection using magic numbers with an extension fallback.
//!
//! # Supported Formats
//!
//! | Format | Magic | Extension |
//! |--------|-------|-----------|
//! | MCAP | `\x89MCAP0\r\n` | `.mcap` |
//! | ROS1 Bag | `#ROSBAG V` | `.bag` |
//! | rosbag2 db3 | `SQLite format 3\0` | `.db3` |
//! | ULog | `ULog\x01\x12\x35` | `.ulg` |
//!
//! # Example
//!
//! ```rust,no_run
//! use roboplay::io::detection::detect_format;
//! use roboplay::io::metadata::FileFormat;
//!
//! let format = detect_format("data.mcap")?;
//! assert_eq!(format, FileFormat::Mcap);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::core::{PlaybackError, Result};

use super::metadata::FileFormat;

/// MCAP magic bytes (start and end of file).
pub const MCAP_MAGIC: &[u8] = b"\x89MCAP0\r\n";
/// ROS1 bag version line prefix.
pub const BAG_MAGIC: &[u8] = b"#ROSBAG V";
/// SQLite database header.
pub const SQLITE_MAGIC: &[u8] = b"SQLite format 3\0";
/// ULog file magic (followed by a version byte).
pub const ULOG_MAGIC: &[u8] = b"ULog\x01\x12\x35";

/// Detect the format of a local file.
///
/// Reads the file header and checks the magic numbers, falling back to the
/// file extension when the header is unreadable or unrecognized.
pub fn detect_format<P: AsRef<Path>>(path: P) -> Result<FileFormat> {
    let path_ref = path.as_ref();

    match detect_from_magic(path_ref) {
        Ok(FileFormat::Unknown) | Err(_) => {}
        Ok(format) => return Ok(format),
    }

    Ok(detect_from_extension(path_ref))
}

/// Detect format by reading file magic numbers.
fn detect_from_magic(path: &Path) -> Result<FileFormat> {
    let mut file = File::open(path).map_err(|e| {
        PlaybackError::io("FormatDetection", format!("Failed to open file: {e}"))
    })?;

    let mut header = [0u8; 16];
    let mut n = 0;
    while n < header.len() {
        let read = file.read(&mut header[n..]).map_err(|e| {
            PlaybackError::io("FormatDetection", format!("Failed to read header: {e}"))
        })?;
        if read == 0 {
            break;
        }
        n += read;
    }

    Ok(detect_from_bytes(&header[..n]))
}

/// Detect format from the leading bytes of a recording.
pub fn detect_from_bytes(header: &[u8]) -> FileFormat {
    if header.starts_with(MCAP_MAGIC) {
        FileFormat::Mcap
    } else if header.starts_with(BAG_MAGIC) {
        FileFormat::Bag
    } else if header.starts_with(SQLITE_MAGIC) {
        FileFormat::Db3
    } else if header.starts_with(ULOG_MAGIC) {
        FileFormat::ULog
    } else {
        FileFormat::Unknown
    }
}

/// Detect format from a file extension.
pub fn detect_from_extension(path: &Path) -> FileFormat {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|ext| match ext.to_lowercase().as_str() {
            "mcap" => FileFormat::Mcap,
            "bag" => FileFormat::Bag,
            "db3" => FileFormat::Db3,
            "ulg" | "ulog" => FileFormat::ULog,
            _ => FileFormat::Unknown,
        })
        .unwrap_or(FileFormat::Unknown)
}

/// Detect format from the path component of a URL.
pub fn detect_from_url(url: &str) -> FileFormat {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    detect_from_extension(Path::new(path))
}
