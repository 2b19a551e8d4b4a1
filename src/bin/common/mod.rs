// SPDX-FileCopyrightText: 2026 ArcheBase
//
// SPDX-License-Identifier: MulanPSL-2.0

//! Common utilities for CLI commands.

use std::io::IsTerminal as _;
use std::path::PathBuf;

use roboplay::io::{open_source, IterableSource, MessageEvent, MessagePayload, TopicFilter};
use roboplay::{InitArgs, WorkerIterableSource};

pub use anyhow::Result as CliResult;
pub type Result<T = ()> = CliResult<T>;

/// Format a duration in nanoseconds to human-readable string.
pub fn format_duration(nanos: u64) -> String {
    let secs = nanos / 1_000_000_000;
    let millis = (nanos % 1_000_000_000) / 1_000_000;

    if secs >= 3600 {
        let hours = secs / 3600;
        let minutes = (secs % 3600) / 60;
        format!("{}h {}m", hours, minutes)
    } else if secs >= 60 {
        let minutes = secs / 60;
        let remaining_secs = secs % 60;
        format!("{}m {}s", minutes, remaining_secs)
    } else if secs > 0 {
        format!("{}.{:03}s", secs, millis)
    } else {
        format!("{}ms", millis)
    }
}

/// Format a timestamp in nanoseconds to human-readable string.
pub fn format_timestamp(nanos: u64) -> String {
    let secs = (nanos / 1_000_000_000) as i64;
    let subsec = (nanos % 1_000_000_000) as u32;
    match chrono::DateTime::<chrono::Utc>::from_timestamp(secs, subsec) {
        Some(dt) => dt.format("%Y-%m-%d %H:%M:%S%.9f UTC").to_string(),
        None => format!("{} ns", nanos),
    }
}

/// Parse a timestamp string to nanoseconds.
///
/// Accepts:
/// - Unix timestamp in seconds: "1234567890" or "1234567890.5"
/// - Unix timestamp in nanoseconds: "1234567890000000000"
/// - RFC 3339: "2023-01-01T00:00:00Z"
pub fn parse_timestamp(s: &str) -> CliResult<u64> {
    if let Ok(n) = s.parse::<u64>() {
        // Anything before year 3000 as seconds is taken as seconds
        return Ok(if n < 32503680000 {
            n * 1_000_000_000
        } else {
            n
        });
    }

    if let Ok(secs) = s.parse::<f64>() {
        if secs.is_finite() && secs >= 0.0 {
            return Ok(roboplay::core::time::from_sec(secs));
        }
    }

    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(s) {
        let nanos = dt
            .timestamp_nanos_opt()
            .ok_or_else(|| anyhow::anyhow!("Timestamp out of range: {s}"))?;
        return u64::try_from(nanos).map_err(|_| anyhow::anyhow!("Timestamp before 1970: {s}"));
    }

    Err(anyhow::anyhow!("Invalid timestamp: {s}"))
}

/// Build a topic filter from a comma-separated list or a regular expression.
pub fn topic_filter(topics: Option<&str>, regex: Option<&str>) -> CliResult<TopicFilter> {
    if let Some(pattern) = regex {
        return Ok(TopicFilter::regex_include(pattern)?);
    }
    Ok(match topics {
        Some(list) => TopicFilter::include(
            list.split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty()),
        ),
        None => TopicFilter::All,
    })
}

/// Describe what to open: URLs when every input looks like one, files otherwise.
pub fn init_args(inputs: &[String]) -> CliResult<InitArgs> {
    if inputs.is_empty() {
        anyhow::bail!("No input given");
    }
    let is_url = |s: &String| s.starts_with("http://") || s.starts_with("https://");
    if inputs.iter().all(is_url) {
        return Ok(if inputs.len() == 1 {
            InitArgs::Url(inputs[0].clone())
        } else {
            InitArgs::Urls(inputs.to_vec())
        });
    }
    if inputs.iter().any(is_url) {
        anyhow::bail!("Cannot mix URLs and local files");
    }
    Ok(InitArgs::from_paths(inputs.iter().map(PathBuf::from)))
}

/// Open the inputs, on a worker thread unless `no_worker` is set.
pub fn open_inputs(inputs: &[String], no_worker: bool) -> CliResult<Box<dyn IterableSource>> {
    let args = init_args(inputs)?;
    Ok(if no_worker {
        open_source(&args)?
    } else {
        Box::new(WorkerIterableSource::with_thread_worker(args))
    })
}

/// One-line description of a message payload.
pub fn payload_preview(msg: &MessageEvent) -> String {
    const PREVIEW_BYTES: usize = 16;
    match &msg.message {
        MessagePayload::Raw(data) => {
            let shown = &data[..data.len().min(PREVIEW_BYTES)];
            let ellipsis = if data.len() > PREVIEW_BYTES { "..." } else { "" };
            format!("{}{ellipsis}", hex::encode(shown))
        }
        MessagePayload::Decoded(value) => value.to_string(),
    }
}

/// Progress bar wrapper for consistent progress reporting.
pub struct ProgressBar {
    inner: Option<indicatif::ProgressBar>,
}

impl ProgressBar {
    /// Create a new progress bar; hidden unless stderr is a terminal.
    pub fn new(total: u64, prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        let inner = if std::io::stderr().is_terminal() {
            let pb = indicatif::ProgressBar::new(total);
            let style = indicatif::ProgressStyle::default_bar()
                .template("{prefix} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {percent}% {msg}")
                .unwrap_or_else(|_| indicatif::ProgressStyle::default_bar())
                .progress_chars("=>-");
            pb.set_style(style);
            pb.set_prefix(prefix);
            Some(pb)
        } else {
            None
        };

        Self { inner }
    }

    /// Set the current position.
    pub fn set_position(&self, pos: u64) {
        if let Some(pb) = &self.inner {
            pb.set_position(pos);
        }
    }

    /// Set the trailing message.
    pub fn set_message(&self, msg: String) {
        if let Some(pb) = &self.inner {
            pb.set_message(msg);
        }
    }

    /// Finish the progress bar with a message.
    pub fn finish_with_message(&self, msg: String) {
        if let Some(pb) = &self.inner {
            pb.finish_with_message(msg);
        }
    }
}
