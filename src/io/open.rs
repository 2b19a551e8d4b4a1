// SPDX-FileCopyrightText: 2026 ArcheBase
//
// SPDX-License-Identifier: MulanPSL-2.0

//! Dynamic format dispatch.
//!
//! Turns an [`InitArgs`] into a boxed [`IterableSource`]: the format is
//! detected per entry and several entries are combined with
//! [`MultiIterableSource`].

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::{PlaybackError, Result};

use super::data::RecordingData;
use super::detection::detect_format;
#[cfg(feature = "remote")]
use super::detection::{detect_from_bytes, detect_from_url};
use super::formats::{BagIterableSource, Db3IterableSource, McapIterableSource, ULogIterableSource};
use super::metadata::FileFormat;
use super::multi::MultiIterableSource;
use super::traits::IterableSource;

/// What to open. Exactly one kind of location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InitArgs {
    /// A single local file
    File(PathBuf),
    /// Several local files of the same format, played as one
    Files(Vec<PathBuf>),
    /// A single remote recording
    Url(String),
    /// Several remote recordings of the same format
    Urls(Vec<String>),
}

impl InitArgs {
    /// Build from command-line style paths: one path is `File`, more are `Files`.
    pub fn from_paths<I, P>(paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let mut paths: Vec<PathBuf> = paths.into_iter().map(|p| p.as_ref().to_path_buf()).collect();
        if paths.len() == 1 {
            InitArgs::File(paths.remove(0))
        } else {
            InitArgs::Files(paths)
        }
    }

    /// Display name for errors.
    pub fn name(&self) -> String {
        match self {
            InitArgs::File(path) => path.display().to_string(),
            InitArgs::Files(paths) => format!("{} files", paths.len()),
            InitArgs::Url(url) => url.clone(),
            InitArgs::Urls(urls) => format!("{} urls", urls.len()),
        }
    }
}

/// Open a source for `args`. Nothing is read beyond format detection until
/// `initialize` is called, except for remote recordings which are fetched.
pub fn open_source(args: &InitArgs) -> Result<Box<dyn IterableSource>> {
    match args {
        InitArgs::File(path) => open_file(path),
        InitArgs::Url(url) => {
            let (format, data) = fetch_recording(url)?;
            source_for(format, data)
        }
        InitArgs::Files(paths) => {
            let formats = paths
                .iter()
                .map(|p| detect_format(p))
                .collect::<Result<Vec<_>>>()?;
            ensure_homogeneous(&formats)?;
            let children = paths
                .iter()
                .zip(formats)
                .map(|(path, format)| source_for(format, RecordingData::file(path)))
                .collect::<Result<Vec<_>>>()?;
            Ok(combine(children))
        }
        InitArgs::Urls(urls) => {
            let fetched = urls
                .iter()
                .map(|url| fetch_recording(url))
                .collect::<Result<Vec<_>>>()?;
            let formats: Vec<FileFormat> = fetched.iter().map(|(format, _)| *format).collect();
            ensure_homogeneous(&formats)?;
            let children = fetched
                .into_iter()
                .map(|(format, data)| source_for(format, data))
                .collect::<Result<Vec<_>>>()?;
            Ok(combine(children))
        }
    }
}

/// Open a single local file, detecting its format.
pub fn open_file(path: &Path) -> Result<Box<dyn IterableSource>> {
    let format = detect_format(path)?;
    debug!(
        context = "open_source",
        path = %path.display(),
        format = %format,
        "Detected format"
    );
    source_for(format, RecordingData::file(path))
}

fn combine(mut children: Vec<Box<dyn IterableSource>>) -> Box<dyn IterableSource> {
    if children.len() == 1 {
        return children.remove(0);
    }
    Box::new(MultiIterableSource::new(children))
}

fn ensure_homogeneous(formats: &[FileFormat]) -> Result<()> {
    match formats.split_first() {
        None => Err(PlaybackError::invalid_argument("No recordings given")),
        Some((first, rest)) => match rest.iter().find(|f| *f != first) {
            Some(other) => Err(PlaybackError::invalid_argument(format!(
                "Cannot combine {first} with {other} recordings"
            ))),
            None => Ok(()),
        },
    }
}

fn source_for(format: FileFormat, data: RecordingData) -> Result<Box<dyn IterableSource>> {
    Ok(match format {
        FileFormat::Mcap => Box::new(McapIterableSource::new(data)),
        FileFormat::Bag => Box::new(BagIterableSource::new(data)),
        FileFormat::ULog => Box::new(ULogIterableSource::new(data)),
        FileFormat::Db3 => Box::new(Db3IterableSource::from_data(data)?),
        FileFormat::Unknown => {
            return Err(PlaybackError::unsupported(format!(
                "Unrecognized recording format: {}",
                data.name()
            )))
        }
    })
}

/// Fetch a remote recording and detect its format.
#[cfg(feature = "remote")]
fn fetch_recording(url: &str) -> Result<(FileFormat, RecordingData)> {
    let data = fetch(url)?;
    let format = match detect_from_bytes(&data) {
        FileFormat::Unknown => detect_from_url(url),
        format => format,
    };
    if format == FileFormat::Db3 {
        return Err(PlaybackError::unsupported("db3 recordings over a URL"));
    }
    Ok((format, RecordingData::memory(url, data)))
}

#[cfg(not(feature = "remote"))]
fn fetch_recording(url: &str) -> Result<(FileFormat, RecordingData)> {
    Err(PlaybackError::unsupported(format!(
        "Remote recordings are disabled in this build: {url}"
    )))
}

/// Download a whole recording into memory.
#[cfg(feature = "remote")]
fn fetch(url: &str) -> Result<bytes::Bytes> {
    debug!(context = "open_source", url, "Fetching remote recording");
    let response = reqwest::blocking::get(url)
        .and_then(|r| r.error_for_status())
        .map_err(|e| PlaybackError::io("RemoteFetch", format!("{url}: {e}")))?;
    let data = response
        .bytes()
        .map_err(|e| PlaybackError::io("RemoteFetch", format!("{url}: {e}")))?;
    debug!(context = "open_source", url, bytes = data.len(), "Fetched remote recording");
    Ok(data)
}
