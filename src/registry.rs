//! Transfer registry
//!
//! The single source of truth for in-flight work: maps each [`TaskId`] to the
//! request that created it and the channel its outcome is delivered on.
//!
//! Every operation on the map takes one lock, so `enqueue`, `lookup`,
//! `claim`, `complete` and `release` are linearizable per task. `enqueue`
//! calls the backend while holding that lock, which means an event for a new
//! task cannot be routed before its entry exists.
//!
//! A task cancelled before its terminal event leaves a short-lived record
//! behind, so the artifact of a completion that was already on its way can
//! still be removed when it arrives.

use crate::backend::TransferBackend;
use crate::error::{Error, FetchError, Result, SubmissionError};
use crate::types::{Delivery, EntryState, TaskId, TransferRequest};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, PoisonError};
use std::task::{Context, Poll};
use tokio::sync::{Mutex, oneshot};
use tokio_util::sync::CancellationToken;
use url::Url;

/// Number of cancelled-before-completion tasks remembered at once
const CANCELLED_MEMORY: usize = 256;

/// Final result of one transfer
pub type Outcome = std::result::Result<Delivery, FetchError>;

/// Registry entry for one in-flight transfer
struct PendingEntry {
    request: TransferRequest,
    state: EntryState,
    /// Set once a terminal backend event has been accepted for this task
    claimed: bool,
    /// Taken exactly once, when the outcome is delivered
    reply: Option<oneshot::Sender<Outcome>>,
    cancel: CancellationToken,
    progress: f32,
}

/// Read-only snapshot of a pending entry
#[derive(Clone, Debug, PartialEq)]
pub struct PendingView {
    /// Task identifier
    pub task_id: TaskId,
    /// Originating request
    pub request: TransferRequest,
    /// Current lifecycle state
    pub state: EntryState,
    /// Last reported progress fraction
    pub progress: f32,
}

/// Exclusive right to drive a task's terminal transition
#[derive(Debug)]
pub struct Claim {
    /// Task identifier
    pub task_id: TaskId,
    /// Originating request
    pub request: TransferRequest,
    /// Fires when the caller cancels the task
    pub cancel: CancellationToken,
}

/// Requester-side handle for one transfer
///
/// Resolves to the transfer's [`Outcome`] exactly once. Dropping the handle
/// does not cancel the transfer.
#[must_use = "the outcome is only observable through the handle"]
#[derive(Debug)]
pub struct TransferHandle {
    task_id: TaskId,
    rx: oneshot::Receiver<Outcome>,
}

impl TransferHandle {
    /// Identifier assigned by the backend
    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    /// Wait for the transfer's outcome
    pub async fn outcome(self) -> Outcome {
        self.await
    }
}

impl Future for TransferHandle {
    type Output = Outcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|received| {
            received.unwrap_or_else(|_| {
                Err(FetchError::Internal {
                    message: "transfer was released without an outcome".into(),
                })
            })
        })
    }
}

/// Map of in-flight transfers, constructed once per process
pub struct TransferRegistry {
    backend: Arc<dyn TransferBackend>,
    entries: Mutex<HashMap<TaskId, PendingEntry>>,
    /// Tasks released by `cancel` whose backend terminal event has not arrived
    cancelled: std::sync::Mutex<VecDeque<TaskId>>,
}

impl TransferRegistry {
    /// Create an empty registry submitting to `backend`
    pub fn new(backend: Arc<dyn TransferBackend>) -> Self {
        Self {
            backend,
            entries: Mutex::new(HashMap::new()),
            cancelled: std::sync::Mutex::new(VecDeque::new()),
        }
    }

    /// Backend this registry submits to
    pub fn backend(&self) -> &Arc<dyn TransferBackend> {
        &self.backend
    }

    /// Start a transfer and record its pending entry
    ///
    /// # Errors
    ///
    /// Returns [`Error::Submission`] when the backend rejects the request; no
    /// entry is recorded in that case.
    pub async fn enqueue(&self, source_uri: Url) -> Result<TransferHandle> {
        let request = TransferRequest::new(source_uri);
        let mut entries = self.entries.lock().await;

        let task_id = self.backend.submit(&request.source_uri)?;

        if entries.contains_key(&task_id) {
            // A backend must not hand out an identifier that is still pending.
            self.backend.cancel(task_id);
            return Err(Error::Submission(SubmissionError::Rejected(format!(
                "backend reused in-flight task id {}",
                task_id
            ))));
        }

        self.forget_cancelled(task_id);

        let (tx, rx) = oneshot::channel();
        entries.insert(
            task_id,
            PendingEntry {
                request,
                state: EntryState::Pending,
                claimed: false,
                reply: Some(tx),
                cancel: CancellationToken::new(),
                progress: 0.0,
            },
        );

        Ok(TransferHandle { task_id, rx })
    }

    /// Snapshot of a pending entry, or `None` if the task is unknown or released
    pub async fn lookup(&self, task_id: TaskId) -> Option<PendingView> {
        let entries = self.entries.lock().await;
        entries.get(&task_id).map(|entry| PendingView {
            task_id,
            request: entry.request.clone(),
            state: entry.state,
            progress: entry.progress,
        })
    }

    /// Accept a terminal event for a task
    ///
    /// Returns `None` for unknown tasks and for tasks whose terminal event was
    /// already accepted, so replays are dropped before they cause side effects.
    pub async fn claim(&self, task_id: TaskId) -> Option<Claim> {
        let mut entries = self.entries.lock().await;
        let entry = entries.get_mut(&task_id)?;
        if entry.claimed {
            return None;
        }
        entry.claimed = true;
        Some(Claim {
            task_id,
            request: entry.request.clone(),
            cancel: entry.cancel.clone(),
        })
    }

    /// Record a state transition for a pending task
    pub async fn set_state(&self, task_id: TaskId, state: EntryState) {
        if let Some(entry) = self.entries.lock().await.get_mut(&task_id) {
            entry.state = state;
        }
    }

    /// Record a progress report
    ///
    /// The fraction is clamped to `[0, 1]`. Returns the value to publish when
    /// it advanced by at least `step` (or reached completion); returns `None`
    /// for unknown or claimed tasks and for regressions.
    pub async fn record_progress(&self, task_id: TaskId, fraction: f32, step: f32) -> Option<f32> {
        let mut entries = self.entries.lock().await;
        let entry = entries.get_mut(&task_id)?;
        if entry.claimed || fraction.is_nan() {
            return None;
        }
        let fraction = fraction.clamp(0.0, 1.0);
        let advanced = fraction - entry.progress;
        if advanced <= 0.0 || (advanced < step && fraction < 1.0) {
            return None;
        }
        entry.progress = fraction;
        Some(fraction)
    }

    /// Deliver a task's outcome, then release its entry
    ///
    /// Both happen under one lock acquisition, in that order. Returns `false`
    /// if the task was already released, in which case nothing is delivered.
    pub async fn complete(&self, task_id: TaskId, outcome: Outcome) -> bool {
        let mut entries = self.entries.lock().await;
        let Some(entry) = entries.get_mut(&task_id) else {
            return false;
        };
        if let Some(reply) = entry.reply.take()
            && reply.send(outcome).is_err()
        {
            tracing::debug!(task_id = task_id.0, "requester dropped its handle");
        }
        entries.remove(&task_id);
        true
    }

    /// Remove a task's entry
    ///
    /// Idempotent: releasing an unknown or already-released task is a no-op
    /// and returns `false`.
    pub async fn release(&self, task_id: TaskId) -> bool {
        self.entries.lock().await.remove(&task_id).is_some()
    }

    /// Cancel a task in any non-terminal state
    ///
    /// An unclaimed task is aborted at the backend and completed with
    /// [`FetchError::Cancelled`] right away; `true` is returned. A claimed task
    /// has its pipeline signalled and `false` is returned; the pipeline
    /// performs cleanup and delivers the outcome.
    ///
    /// An unclaimed task is remembered until [`take_cancelled`](Self::take_cancelled)
    /// is called for it, so its late terminal event can be told apart from a
    /// replay.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the task is not pending.
    pub async fn cancel(&self, task_id: TaskId) -> Result<bool> {
        let mut entries = self.entries.lock().await;
        let Some(entry) = entries.get_mut(&task_id) else {
            return Err(Error::NotFound(format!("transfer {}", task_id)));
        };

        entry.cancel.cancel();
        if entry.claimed {
            return Ok(false);
        }

        // Marking the entry claimed drops the backend's own terminal event.
        entry.claimed = true;
        self.backend.cancel(task_id);
        if let Some(reply) = entry.reply.take() {
            reply.send(Err(FetchError::Cancelled)).ok();
        }
        entries.remove(&task_id);
        self.remember_cancelled(task_id);
        Ok(true)
    }

    /// Whether `task_id` was cancelled before its terminal event arrived
    ///
    /// Returns `true` at most once per cancellation; the record is consumed.
    pub fn take_cancelled(&self, task_id: TaskId) -> bool {
        self.forget_cancelled(task_id)
    }

    fn remember_cancelled(&self, task_id: TaskId) {
        let mut cancelled = self.cancelled.lock().unwrap_or_else(PoisonError::into_inner);
        if cancelled.len() == CANCELLED_MEMORY {
            cancelled.pop_front();
        }
        cancelled.push_back(task_id);
    }

    fn forget_cancelled(&self, task_id: TaskId) -> bool {
        let mut cancelled = self.cancelled.lock().unwrap_or_else(PoisonError::into_inner);
        match cancelled.iter().position(|id| *id == task_id) {
            Some(index) => {
                cancelled.remove(index);
                true
            }
            None => false,
        }
    }

    /// Number of pending entries
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// Whether no transfer is pending
    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    /// Identifiers of every pending task
    pub async fn task_ids(&self) -> Vec<TaskId> {
        let mut ids: Vec<_> = self.entries.lock().await.keys().copied().collect();
        ids.sort();
        ids
    }
}
