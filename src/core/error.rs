// SPDX-FileCopyrightText: 2026 ArcheBase
//
// SPDX-License-Identifier: MulanPSL-2.0

//! Core error types for roboplay.
//!
//! Two kinds of error are fatal to the current source and are surfaced to
//! the caller as actionable errors:
//! - [`PlaybackError::Initialization`] - the source cannot be opened at all
//! - [`PlaybackError::Iteration`] - forward iteration broke mid-stream
//!
//! The remaining variants describe the underlying cause (parse failures,
//! I/O, unsupported features) and are usually wrapped into one of the two
//! fatal kinds at a source boundary. Non-fatal problems are not errors:
//! they travel as [`Alert`](crate::io::metadata::Alert) values.

use thiserror::Error;

/// Errors that can occur while opening, iterating or playing a source.
#[derive(Debug, Clone, Error)]
pub enum PlaybackError {
    /// The source could not be opened or parsed.
    #[error("Failed to initialize {origin}: {message}")]
    Initialization {
        /// File path, URL or worker name
        origin: String,
        /// Error message
        message: String,
    },

    /// Forward iteration failed (truncated file, worker crash, ...).
    #[error("Iteration failed: {message}")]
    Iteration {
        /// Error message
        message: String,
    },

    /// Parse error in container data
    #[error("Parse error in {context}: {message}")]
    Parse {
        /// What was being parsed
        context: String,
        /// Error message
        message: String,
    },

    /// I/O error with context
    #[error("I/O error in {context}: {message}")]
    Io {
        /// Operation context
        context: String,
        /// Error message
        message: String,
    },

    /// Unsupported format, compression or feature
    #[error("Unsupported feature: '{feature}'")]
    Unsupported {
        /// What is not supported
        feature: String,
    },

    /// Caller passed an argument outside the accepted domain
    #[error("Invalid argument: {message}")]
    InvalidArgument {
        /// Error message
        message: String,
    },

    /// The player or source has been closed
    #[error("Closed")]
    Closed,

    /// Other error
    #[error("Other error: {0}")]
    Other(String),
}

impl PlaybackError {
    /// Create an initialization error from any displayable cause.
    pub fn initialization(origin: impl Into<String>, cause: impl std::fmt::Display) -> Self {
        PlaybackError::Initialization {
            origin: origin.into(),
            message: cause.to_string(),
        }
    }

    /// Create an iteration error from any displayable cause.
    pub fn iteration(cause: impl std::fmt::Display) -> Self {
        PlaybackError::Iteration {
            message: cause.to_string(),
        }
    }

    /// Create a parse error.
    pub fn parse(context: impl Into<String>, message: impl Into<String>) -> Self {
        PlaybackError::Parse {
            context: context.into(),
            message: message.into(),
        }
    }

    /// Create an I/O error.
    pub fn io(context: impl Into<String>, message: impl Into<String>) -> Self {
        PlaybackError::Io {
            context: context.into(),
            message: message.into(),
        }
    }

    /// Create an unsupported feature error.
    pub fn unsupported(feature: impl Into<String>) -> Self {
        PlaybackError::Unsupported {
            feature: feature.into(),
        }
    }

    /// Create an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        PlaybackError::InvalidArgument {
            message: message.into(),
        }
    }

    /// Whether this error ends playback of the current source.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PlaybackError::Initialization { .. } | PlaybackError::Iteration { .. }
        )
    }

    /// Wrap into an iteration error unless already fatal.
    pub fn into_iteration(self) -> Self {
        if self.is_fatal() {
            self
        } else {
            PlaybackError::iteration(self)
        }
    }

    /// Get structured fields for logging.
    pub fn log_fields(&self) -> Vec<(&'static str, String)> {
        match self {
            PlaybackError::Initialization { origin, message } => {
                vec![("origin", origin.clone()), ("message", message.clone())]
            }
            PlaybackError::Iteration { message } => vec![("message", message.clone())],
            PlaybackError::Parse { context, message } | PlaybackError::Io { context, message } => {
                vec![("context", context.clone()), ("message", message.clone())]
            }
            PlaybackError::Unsupported { feature } => vec![("feature", feature.clone())],
            PlaybackError::InvalidArgument { message } => vec![("message", message.clone())],
            PlaybackError::Closed => Vec::new(),
            PlaybackError::Other(msg) => vec![("message", msg.clone())],
        }
    }
}

impl From<std::io::Error> for PlaybackError {
    fn from(err: std::io::Error) -> Self {
        PlaybackError::io("IO", err.to_string())
    }
}

/// Result type for roboplay operations.
pub type Result<T> = std::result::Result<T, PlaybackError>;
