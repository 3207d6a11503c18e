//! Error types for media-dl
//!
//! Two layers of errors live here:
//! - [`Error`]: failures of the library's own operations (configuration,
//!   submission, I/O, shutdown). Returned from `Result`-typed methods.
//! - [`FetchError`]: the terminal failure of one transfer, delivered to the
//!   requester through its result channel and tagged with its kind.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for media-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for media-dl
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "output_dir")
        key: Option<String>,
    },

    /// The transfer backend refused the request
    #[error("submission rejected: {0}")]
    Submission(#[from] SubmissionError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Task not found in the registry
    #[error("transfer not found: {0}")]
    NotFound(String),

    /// Shutdown in progress - not accepting new transfers
    #[error("shutdown in progress: not accepting new transfers")]
    ShuttingDown,

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Configuration could not be parsed
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// File move/rename failed
    #[error("failed to move {source_path} to {dest_path}: {reason}")]
    MoveFailed {
        /// The source path of the file being moved
        source_path: PathBuf,
        /// The destination path where the file should be moved
        dest_path: PathBuf,
        /// The reason the move failed
        reason: String,
    },

    /// File collision at destination
    #[error("file collision at {path}: {reason}")]
    FileCollision {
        /// The path where the collision occurred
        path: PathBuf,
        /// The reason for the collision (e.g., "file already exists")
        reason: String,
    },

    /// Invalid path encountered while finalizing
    #[error("invalid path {path}: {reason}")]
    InvalidPath {
        /// The invalid path that was encountered
        path: PathBuf,
        /// The reason the path is invalid
        reason: String,
    },

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Machine-readable error code
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::Config { .. } => "config_error",
            Error::Submission(_) => "submission_error",
            Error::Io(_) => "io_error",
            Error::NotFound(_) => "not_found",
            Error::ShuttingDown => "shutting_down",
            Error::Network(_) => "network_error",
            Error::Serialization(_) => "serialization_error",
            Error::MoveFailed { .. } => "move_failed",
            Error::FileCollision { .. } => "file_collision",
            Error::InvalidPath { .. } => "invalid_path",
            Error::Other(_) => "internal_error",
        }
    }
}

/// Reasons a backend refuses to start a transfer
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmissionError {
    /// Locator is not absolute or uses a scheme the backend cannot fetch
    #[error("unsupported locator {uri}: {reason}")]
    UnsupportedUri {
        /// The rejected locator
        uri: String,
        /// Why it was rejected
        reason: String,
    },

    /// Backend is no longer accepting transfers
    #[error("transfer backend is closed")]
    Closed,

    /// Backend-specific refusal
    #[error("{0}")]
    Rejected(String),
}

/// Failure reported by the transcode step
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TranscodeError {
    /// The process ran and signalled failure with an exit code
    #[error("transcoder exited with code {code}")]
    Exited {
        /// Exit code reported by the process
        code: i32,
    },

    /// The process was terminated by a signal, or reported success without
    /// producing the output artifact
    #[error("transcoder failed: {reason}")]
    Abnormal {
        /// What went wrong
        reason: String,
    },

    /// The process could not be launched
    #[error("failed to launch transcoder: {0}")]
    Launch(String),

    /// The process exceeded the configured timeout and was killed
    #[error("transcoder timed out after {secs}s")]
    TimedOut {
        /// Timeout in seconds
        secs: u64,
    },

    /// No transcoder is available
    #[error("transcoding unavailable: {0}")]
    Unavailable(String),
}

impl TranscodeError {
    /// Failure code surfaced to the requester
    ///
    /// The process's own exit code when it has one, `-1` otherwise.
    pub fn code(&self) -> i32 {
        match self {
            TranscodeError::Exited { code } => *code,
            _ => -1,
        }
    }
}

/// Terminal failure of one transfer, delivered to its requester
///
/// A rejected submission never gets here: it is returned from `fetch` as
/// [`Error::Submission`] and no handle exists for it.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FetchError {
    /// Network/backend failure during the transfer
    #[error("transfer error: {message}")]
    Transfer {
        /// Error message
        message: String,
    },

    /// Moving the backend artifact into staging (or to its stable location) failed
    #[error("staging error: {message}")]
    Staging {
        /// Error message
        message: String,
    },

    /// Transcode step failed
    #[error("transcode error (code {code}): {message}")]
    Transcode {
        /// Code signalled by the transcode process
        code: i32,
        /// Error message
        message: String,
    },

    /// Transfer was cancelled by the caller
    #[error("transfer cancelled")]
    Cancelled,

    /// The pipeline for this transfer aborted unexpectedly
    #[error("internal error: {message}")]
    Internal {
        /// Error message
        message: String,
    },
}

impl FetchError {
    /// Machine-readable error code
    pub fn error_code(&self) -> &'static str {
        match self {
            FetchError::Transfer { .. } => "transfer_error",
            FetchError::Staging { .. } => "staging_error",
            FetchError::Transcode { .. } => "transcode_error",
            FetchError::Cancelled => "cancelled",
            FetchError::Internal { .. } => "internal_error",
        }
    }

    /// Build a transfer error from any displayable cause
    pub fn transfer(cause: impl std::fmt::Display) -> Self {
        FetchError::Transfer {
            message: cause.to_string(),
        }
    }

    /// Build a staging error from any displayable cause
    pub fn staging(cause: impl std::fmt::Display) -> Self {
        FetchError::Staging {
            message: cause.to_string(),
        }
    }
}

impl From<TranscodeError> for FetchError {
    fn from(e: TranscodeError) -> Self {
        FetchError::Transcode {
            code: e.code(),
            message: e.to_string(),
        }
    }
}
