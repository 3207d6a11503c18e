//! Transfer backends
//!
//! A backend runs transfers outside the caller's control flow and reports
//! their outcome as [`BackendEvent`]s on a channel. It guarantees exactly one
//! terminal event (`Completed` or `Failed`) per [`TaskId`], and progress
//! fractions that never decrease for a given task. Nothing is guaranteed
//! about ordering across tasks, and a backend replaying after a restart may
//! deliver a terminal event more than once.
//!
//! ## Architecture
//!
//! - [`TransferBackend`]: submission and cancellation interface
//! - [`HttpBackend`]: reqwest-based implementation that streams to disk
//! - [`ManualBackend`]: records submissions and forwards reports from an
//!   externally supervised transfer service
//!
//! The backend is handed to [`MediaFetcher`](crate::MediaFetcher) together with
//! the receiving half of its event channel:
//!
//! ```no_run
//! use media_dl::{Config, HttpBackend, MediaFetcher};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!     let (backend, events) = HttpBackend::new(&config)?;
//!     let fetcher = MediaFetcher::new(config, Arc::new(backend), events).await?;
//!     # let _ = fetcher;
//!     Ok(())
//! }
//! ```

mod http;
mod manual;

pub use http::HttpBackend;
pub use manual::ManualBackend;

use crate::error::SubmissionError;
use crate::types::TaskId;
use std::path::PathBuf;
use tokio::sync::mpsc;
use url::Url;

/// Notification emitted by a transfer backend
#[derive(Clone, Debug, PartialEq)]
pub enum BackendEvent {
    /// Non-terminal progress report
    Progress {
        /// Task the report belongs to
        task_id: TaskId,
        /// Completed fraction in `[0, 1]`
        fraction: f32,
    },
    /// Transfer finished; the artifact is at `location` until the receiver moves it
    Completed {
        /// Task that finished
        task_id: TaskId,
        /// Backend-owned temporary location of the artifact
        location: PathBuf,
    },
    /// Transfer failed
    Failed {
        /// Task that failed
        task_id: TaskId,
        /// Backend's description of the failure
        error: String,
    },
    /// Every event of the current session has been delivered
    SessionDrained,
}

/// Sending half of a backend's event channel
pub type EventSender = mpsc::UnboundedSender<BackendEvent>;

/// Receiving half of a backend's event channel
pub type BackendEvents = mpsc::UnboundedReceiver<BackendEvent>;

/// Create a backend event channel
pub fn event_channel() -> (EventSender, BackendEvents) {
    mpsc::unbounded_channel()
}

/// Interface to a system that runs transfers on the caller's behalf
///
/// `submit` is synchronous: the registry calls it while holding its lock so
/// that the pending entry exists before any event for the new task can be
/// processed. Implementations must return quickly and run the transfer
/// elsewhere.
pub trait TransferBackend: Send + Sync {
    /// Start a transfer for `uri` and return its task identifier
    ///
    /// # Errors
    ///
    /// Returns a [`SubmissionError`] if the locator is unsupported or the
    /// backend is not accepting work. No events are emitted for a rejected
    /// submission.
    fn submit(&self, uri: &Url) -> Result<TaskId, SubmissionError>;

    /// Abort a running transfer
    ///
    /// Best effort: a transfer that already finished is unaffected. An aborted
    /// transfer may still emit a terminal event.
    fn cancel(&self, task_id: TaskId);

    /// Stop accepting submissions and abort everything in flight
    fn close(&self);

    /// Human-readable name for logging
    fn name(&self) -> &'static str;
}
