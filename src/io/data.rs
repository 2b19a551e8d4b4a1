// SPDX-FileCopyrightText: 2026 ArcheBase
//
// SPDX-License-Identifier: MulanPSL-2.0

//! Recording bytes, either memory-mapped from disk or already in memory.
//!
//! Sources read their container through [`RecordingData`] so that local
//! files and downloaded URLs share one code path. Mapped files are wrapped
//! in [`Bytes`], which lets message payloads be sliced out without copying.

use std::fs::File;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use tracing::debug;

use crate::core::{PlaybackError, Result};

/// Where a source reads its bytes from.
#[derive(Debug, Clone)]
pub enum RecordingData {
    /// A local file, mapped on load
    File(PathBuf),
    /// Bytes already in memory (e.g. a downloaded URL)
    Memory {
        /// Display name
        name: String,
        /// Full file contents
        data: Bytes,
    },
}

impl RecordingData {
    /// Read from a local file.
    pub fn file(path: impl AsRef<Path>) -> Self {
        RecordingData::File(path.as_ref().to_path_buf())
    }

    /// Read from bytes in memory.
    pub fn memory(name: impl Into<String>, data: Bytes) -> Self {
        RecordingData::Memory {
            name: name.into(),
            data,
        }
    }

    /// Display name used in alerts and errors.
    pub fn name(&self) -> String {
        match self {
            RecordingData::File(path) => path.display().to_string(),
            RecordingData::Memory { name, .. } => name.clone(),
        }
    }

    /// Local path, if the data lives in a file.
    pub fn path(&self) -> Option<&Path> {
        match self {
            RecordingData::File(path) => Some(path),
            RecordingData::Memory { .. } => None,
        }
    }

    /// Load the full contents.
    ///
    /// Files are memory-mapped; the mapping lives as long as any slice of
    /// the returned buffer.
    pub fn load(&self) -> Result<Bytes> {
        match self {
            RecordingData::File(path) => map_file(path),
            RecordingData::Memory { data, .. } => Ok(data.clone()),
        }
    }
}

/// Memory-map a file into a shared buffer.
pub fn map_file(path: &Path) -> Result<Bytes> {
    let file = File::open(path).map_err(|e| {
        PlaybackError::io(
            "RecordingData",
            format!("Failed to open {}: {e}", path.display()),
        )
    })?;
    let len = file
        .metadata()
        .map_err(|e| PlaybackError::io("RecordingData", format!("Failed to stat file: {e}")))?
        .len();
    if len == 0 {
        return Ok(Bytes::new());
    }

    // SAFETY: the mapping is read-only; recordings are not modified while open
    let mmap = unsafe { memmap2::Mmap::map(&file) }
        .map_err(|e| PlaybackError::io("RecordingData", format!("Failed to mmap file: {e}")))?;
    debug!(
        context = "RecordingData",
        path = %path.display(),
        size = mmap.len(),
        "Mapped recording"
    );
    Ok(Bytes::from_owner(mmap))
}
