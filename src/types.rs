//! Core types for media-dl

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use url::Url;

/// Opaque identifier assigned by the transfer backend at submission time
///
/// Unique among in-flight transfers and never reused while the registry holds
/// an entry for it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub u64);

impl TaskId {
    /// Create a new TaskId
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the inner u64 value
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl From<u64> for TaskId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl From<TaskId> for u64 {
    fn from(id: TaskId) -> Self {
        id.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TaskId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

/// Container/protocol kind signalled by the source locator
///
/// Derived from the last path segment's extension. The derivation never looks
/// at file content, so a mislabelled source is classified by its label.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// HLS playlist (.m3u8)
    Hls,
    /// MPEG-DASH manifest (.mpd)
    Dash,
    /// Any other recognised file extension, lowercased without the dot
    Extension(String),
    /// No extension could be read from the locator
    Unknown,
}

impl SourceKind {
    /// Classify a source locator by its final path segment
    pub fn from_url(url: &Url) -> Self {
        let last = url
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .unwrap_or("");

        match std::path::Path::new(last)
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
        {
            Some(ext) if ext == "m3u8" => SourceKind::Hls,
            Some(ext) if ext == "mpd" => SourceKind::Dash,
            Some(ext) if !ext.is_empty() => SourceKind::Extension(ext),
            _ => SourceKind::Unknown,
        }
    }

    /// The extension this kind was derived from, if any
    pub fn extension(&self) -> Option<&str> {
        match self {
            SourceKind::Hls => Some("m3u8"),
            SourceKind::Dash => Some("mpd"),
            SourceKind::Extension(ext) => Some(ext.as_str()),
            SourceKind::Unknown => None,
        }
    }
}

/// An immutable request to fetch one remote resource
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    /// Absolute locator of the remote resource
    pub source_uri: Url,
    /// When the caller asked for the transfer
    pub requested_at: DateTime<Utc>,
}

impl TransferRequest {
    /// Build a request stamped with the current time
    pub fn new(source_uri: Url) -> Self {
        Self {
            source_uri,
            requested_at: Utc::now(),
        }
    }

    /// Source kind signalled by the locator
    pub fn source_kind(&self) -> SourceKind {
        SourceKind::from_url(&self.source_uri)
    }

    /// Final path segment of the locator, or "download" when it has none
    pub fn file_name(&self) -> String {
        self.source_uri
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| "download".to_string())
    }
}

/// Lifecycle state of a registry entry
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryState {
    /// Submitted to the backend, waiting for a terminal event
    Pending,
    /// Backend artifact moved into router-owned staging
    Staged,
    /// Normalization step running
    Transcoding,
    /// Moving the staged artifact to its stable location
    DirectFinalize,
}

/// Where the final artifact should go
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DestinationKind {
    /// Save into the user's media library
    LibrarySave,
    /// Export as a regular file
    FileExport,
}

/// Successful outcome delivered to the requester
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delivery {
    /// Transfer this delivery belongs to
    pub task_id: TaskId,
    /// Stable location of the final artifact
    pub path: PathBuf,
    /// Destination chosen by the resolver
    pub destination: DestinationKind,
    /// Whether the artifact went through the transcode step
    pub transcoded: bool,
}

/// Event emitted during the transfer lifecycle
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Transfer submitted and registered
    Queued {
        /// Task ID
        id: TaskId,
        /// Source locator
        source: Url,
    },

    /// Transfer progress update
    Progress {
        /// Task ID
        id: TaskId,
        /// Completed fraction in `[0, 1]`
        fraction: f32,
    },

    /// Backend artifact moved into staging
    Staged {
        /// Task ID
        id: TaskId,
        /// Router-owned staging path
        path: PathBuf,
    },

    /// Normalization step started
    Transcoding {
        /// Task ID
        id: TaskId,
    },

    /// Final artifact handed to its destination
    Delivered {
        /// Task ID
        id: TaskId,
        /// Stable location of the artifact
        path: PathBuf,
        /// Destination kind chosen by the resolver
        destination: DestinationKind,
    },

    /// Transfer reached a failed terminal state
    Failed {
        /// Task ID
        id: TaskId,
        /// Machine-readable error code
        code: String,
        /// Error message
        error: String,
    },

    /// A backend event arrived for a task that is not pending
    DuplicateDropped {
        /// Task ID
        id: TaskId,
    },

    /// Backend reported that every event of the session was delivered
    SessionDrained {
        /// Whether a relaunch token was released
        token_released: bool,
    },

    /// Fetcher is shutting down
    Shutdown,
}

/// Capability report for the configured transcode step
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    /// Whether sources that need normalization can be transcoded
    pub can_transcode: bool,
    /// Name of the transcoder implementation
    pub transcoder: String,
}
