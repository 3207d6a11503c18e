//! Backend driven by the embedding application

use super::{BackendEvent, BackendEvents, EventSender, TransferBackend, event_channel};
use crate::error::SubmissionError;
use crate::types::TaskId;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use url::Url;

/// Backend whose transfers are executed by someone else
///
/// Submissions are only recorded and assigned identifiers; the embedding code
/// runs the transfer (for example through a platform download service that
/// keeps going while the process is suspended) and reports back through
/// [`complete`](Self::complete), [`fail`](Self::fail),
/// [`progress`](Self::progress) and [`session_drained`](Self::session_drained).
///
/// # Examples
///
/// ```
/// use media_dl::backend::{BackendEvent, ManualBackend, TransferBackend};
/// use url::Url;
///
/// let (backend, mut events) = ManualBackend::new();
/// let id = backend.submit(&Url::parse("https://example.com/a.mp4").unwrap()).unwrap();
/// backend.fail(id, "connection reset");
///
/// assert!(matches!(events.try_recv(), Ok(BackendEvent::Failed { .. })));
/// ```
pub struct ManualBackend {
    events: EventSender,
    next_id: AtomicU64,
    closed: AtomicBool,
    state: Mutex<ManualState>,
}

#[derive(Default)]
struct ManualState {
    submitted: Vec<(TaskId, Url)>,
    cancelled: Vec<TaskId>,
    reject_next: Option<String>,
    repeat_id: Option<TaskId>,
}

impl ManualBackend {
    /// Create a backend and the receiving half of its event channel
    pub fn new() -> (Self, BackendEvents) {
        let (events, rx) = event_channel();
        let backend = Self {
            events,
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
            state: Mutex::new(ManualState::default()),
        };
        (backend, rx)
    }

    fn state(&self) -> MutexGuard<'_, ManualState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Report that a transfer finished with its artifact at `location`
    pub fn complete(&self, task_id: TaskId, location: impl Into<PathBuf>) {
        self.emit(BackendEvent::Completed {
            task_id,
            location: location.into(),
        });
    }

    /// Report that a transfer failed
    pub fn fail(&self, task_id: TaskId, error: impl Into<String>) {
        self.emit(BackendEvent::Failed {
            task_id,
            error: error.into(),
        });
    }

    /// Report transfer progress
    pub fn progress(&self, task_id: TaskId, fraction: f32) {
        self.emit(BackendEvent::Progress { task_id, fraction });
    }

    /// Report that every event of the session has been delivered
    pub fn session_drained(&self) {
        self.emit(BackendEvent::SessionDrained);
    }

    /// Refuse the next submission with `reason`
    pub fn reject_next(&self, reason: impl Into<String>) {
        self.state().reject_next = Some(reason.into());
    }

    /// Every accepted submission, in order
    pub fn submitted(&self) -> Vec<(TaskId, Url)> {
        self.state().submitted.clone()
    }

    /// Every task the core asked to cancel, in order
    pub fn cancelled(&self) -> Vec<TaskId> {
        self.state().cancelled.clone()
    }

    /// Hand out `task_id` again on the next submission
    #[cfg(test)]
    pub(crate) fn repeat_id(&self, task_id: TaskId) {
        self.state().repeat_id = Some(task_id);
    }

    fn emit(&self, event: BackendEvent) {
        if self.events.send(event).is_err() {
            tracing::debug!("backend event receiver is gone");
        }
    }
}

impl TransferBackend for ManualBackend {
    fn submit(&self, uri: &Url) -> Result<TaskId, SubmissionError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SubmissionError::Closed);
        }
        let mut state = self.state();
        if let Some(reason) = state.reject_next.take() {
            return Err(SubmissionError::Rejected(reason));
        }
        let task_id = state
            .repeat_id
            .take()
            .unwrap_or_else(|| TaskId(self.next_id.fetch_add(1, Ordering::SeqCst)));
        state.submitted.push((task_id, uri.clone()));
        Ok(task_id)
    }

    fn cancel(&self, task_id: TaskId) {
        self.state().cancelled.push(task_id);
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn name(&self) -> &'static str {
        "manual"
    }
}
