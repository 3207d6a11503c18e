//! Starting, cancelling and inspecting transfers.

use crate::error::{Error, Result, SubmissionError};
use crate::registry::{PendingView, TransferHandle};
use crate::types::{Event, TaskId};
use std::sync::atomic::Ordering;
use url::Url;

use super::MediaFetcher;

impl MediaFetcher {
    /// Start fetching `source_uri`
    ///
    /// The returned handle resolves exactly once, to the delivered artifact or
    /// the failure that ended the transfer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Submission`] if the locator is not an absolute URL or
    /// the backend rejects it, and [`Error::ShuttingDown`] after
    /// [`shutdown`](Self::shutdown). Nothing is recorded in either case.
    pub async fn fetch(&self, source_uri: &str) -> Result<TransferHandle> {
        let url = Url::parse(source_uri).map_err(|e| {
            Error::Submission(SubmissionError::UnsupportedUri {
                uri: source_uri.to_string(),
                reason: e.to_string(),
            })
        })?;
        self.fetch_url(url).await
    }

    /// Start fetching an already parsed locator
    ///
    /// # Errors
    ///
    /// See [`fetch`](Self::fetch).
    pub async fn fetch_url(&self, source_uri: Url) -> Result<TransferHandle> {
        if !self.accepting_new.load(Ordering::SeqCst) {
            return Err(Error::ShuttingDown);
        }

        let handle = match self.registry.enqueue(source_uri.clone()).await {
            Ok(handle) => handle,
            Err(e) => {
                tracing::warn!(uri = %source_uri, error = %e, "transfer submission rejected");
                return Err(e);
            }
        };

        tracing::info!(task_id = handle.task_id().0, uri = %source_uri, "transfer queued");
        self.emit_event(Event::Queued {
            id: handle.task_id(),
            source: source_uri,
        });
        Ok(handle)
    }

    /// Cancel a transfer in any non-terminal state
    ///
    /// The backend transfer is aborted or the running pipeline is stopped
    /// (killing a transcode in progress), temporary files are removed and the
    /// handle resolves to [`FetchError::Cancelled`](crate::FetchError::Cancelled).
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the task is not pending.
    pub async fn cancel(&self, task_id: TaskId) -> Result<()> {
        let delivered = self.registry.cancel(task_id).await?;
        tracing::info!(task_id = task_id.0, "transfer cancellation requested");

        // A claimed task reports its own terminal event from the pipeline.
        if delivered {
            let error = crate::error::FetchError::Cancelled;
            self.emit_event(Event::Failed {
                id: task_id,
                code: error.error_code().to_string(),
                error: error.to_string(),
            });
        }
        Ok(())
    }

    /// Snapshot of a pending transfer, `None` once it is released
    pub async fn lookup(&self, task_id: TaskId) -> Option<PendingView> {
        self.registry.lookup(task_id).await
    }

    /// Number of transfers that have not reached a terminal state
    pub async fn pending_count(&self) -> usize {
        self.registry.len().await
    }

    /// Identifiers of every pending transfer, in ascending order
    pub async fn pending_tasks(&self) -> Vec<TaskId> {
        self.registry.task_ids().await
    }
}
