//! Completion router
//!
//! Consumes [`BackendEvent`]s in a single loop and drives each task through
//! `Pending -> Staged -> (Transcoding | DirectFinalize) -> Delivered | Failed`.
//!
//! The loop itself only does bookkeeping: a terminal event is claimed in the
//! registry (dropping replays) and the rest of the pipeline runs on its own
//! task, so a slow transcode never delays events for other transfers.

mod pipeline;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

use crate::backend::{BackendEvent, BackendEvents};
use crate::config::Config;
use crate::destination::DestinationResolver;
use crate::error::FetchError;
use crate::policy::NormalizePolicy;
use crate::registry::TransferRegistry;
use crate::relaunch::RelaunchBridge;
use crate::staging::remove_quietly;
use crate::transcode::Transcoder;
use crate::types::{Event, TaskId};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Semaphore, broadcast, watch};
use tokio_util::sync::CancellationToken;

/// Everything the router needs, handed over by the fetcher at construction
pub(crate) struct RouterParams {
    /// Shared registry
    pub registry: Arc<TransferRegistry>,
    /// Normalization policy
    pub policy: NormalizePolicy,
    /// Transcode step
    pub transcoder: Arc<dyn Transcoder>,
    /// Destination resolver
    pub destination: Arc<dyn DestinationResolver>,
    /// Relaunch token holder
    pub bridge: Arc<RelaunchBridge>,
    /// Configuration
    pub config: Arc<Config>,
    /// Event broadcast sender
    pub event_tx: broadcast::Sender<Event>,
}

/// State machine driving finished transfers to their destination
#[derive(Clone)]
pub(crate) struct CompletionRouter {
    registry: Arc<TransferRegistry>,
    policy: Arc<NormalizePolicy>,
    transcoder: Arc<dyn Transcoder>,
    destination: Arc<dyn DestinationResolver>,
    bridge: Arc<RelaunchBridge>,
    config: Arc<Config>,
    event_tx: broadcast::Sender<Event>,
    /// Bounds the number of concurrently running transcodes
    transcode_slots: Arc<Semaphore>,
    /// Number of pipelines that have been started and not yet finished
    in_flight: Arc<watch::Sender<usize>>,
}

/// Counts a running pipeline for as long as it is alive
struct InFlightGuard(Arc<watch::Sender<usize>>);

impl InFlightGuard {
    fn enter(counter: &Arc<watch::Sender<usize>>) -> Self {
        counter.send_modify(|n| *n += 1);
        Self(counter.clone())
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.send_modify(|n| *n = n.saturating_sub(1));
    }
}

impl CompletionRouter {
    pub(crate) fn new(params: RouterParams) -> Self {
        let RouterParams {
            registry,
            policy,
            transcoder,
            destination,
            bridge,
            config,
            event_tx,
        } = params;
        let slots = config.transcode.max_concurrent_transcodes.max(1);
        let (in_flight, _) = watch::channel(0);
        Self {
            registry,
            policy: Arc::new(policy),
            transcoder,
            destination,
            bridge,
            config,
            event_tx,
            transcode_slots: Arc::new(Semaphore::new(slots)),
            in_flight: Arc::new(in_flight),
        }
    }

    /// Spawn the event-consumer loop
    ///
    /// The loop ends when `shutdown` fires or the backend drops its sender.
    pub(crate) fn spawn(
        self,
        events: BackendEvents,
        shutdown: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move { self.run(events, shutdown).await })
    }

    async fn run(self, mut events: BackendEvents, shutdown: CancellationToken) {
        tracing::debug!("completion router started");
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    tracing::debug!("completion router stopping");
                    break;
                }
                event = events.recv() => match event {
                    Some(event) => self.dispatch(event).await,
                    None => {
                        tracing::debug!("backend event channel closed, completion router stopping");
                        break;
                    }
                },
            }
        }
    }

    /// Apply one backend event
    pub(crate) async fn dispatch(&self, event: BackendEvent) {
        match event {
            BackendEvent::Progress { task_id, fraction } => self.on_progress(task_id, fraction).await,
            BackendEvent::Completed { task_id, location } => {
                self.on_completed(task_id, location).await
            }
            BackendEvent::Failed { task_id, error } => self.on_failed(task_id, error).await,
            BackendEvent::SessionDrained => self.on_session_drained(),
        }
    }

    async fn on_progress(&self, task_id: TaskId, fraction: f32) {
        let step = self.config.download.progress_step;
        if let Some(fraction) = self.registry.record_progress(task_id, fraction, step).await {
            self.emit(Event::Progress {
                id: task_id,
                fraction,
            });
        }
    }

    async fn on_completed(&self, task_id: TaskId, location: PathBuf) {
        let Some(claim) = self.registry.claim(task_id).await else {
            if self.registry.take_cancelled(task_id) {
                tracing::debug!(task_id = task_id.0, location = ?location, "removing artifact of a cancelled transfer");
                remove_quietly(&location).await;
            }
            self.drop_duplicate(task_id, "completed");
            return;
        };

        tracing::debug!(task_id = task_id.0, location = ?location, "transfer completed, starting pipeline");

        // Counted before the spawn so a drain processed right after this event
        // already sees the pipeline.
        let guard = InFlightGuard::enter(&self.in_flight);
        let router = self.clone();
        tokio::spawn(async move {
            let _guard = guard;
            router.process(claim, location).await;
        });
    }

    async fn on_failed(&self, task_id: TaskId, error: String) {
        if self.registry.claim(task_id).await.is_none() {
            self.registry.take_cancelled(task_id);
            self.drop_duplicate(task_id, "failed");
            return;
        }
        self.finish(task_id, Err(FetchError::transfer(error))).await;
    }

    fn on_session_drained(&self) {
        let router = self.clone();
        tokio::spawn(async move {
            let pending = *router.in_flight.borrow();
            if pending > 0 {
                tracing::debug!(pending, "session drained, waiting for running pipelines");
            }
            router.wait_idle().await;
            let token_released = router.bridge.release();
            router.emit(Event::SessionDrained { token_released });
        });
    }

    fn drop_duplicate(&self, task_id: TaskId, kind: &str) {
        tracing::warn!(
            task_id = task_id.0,
            event = kind,
            "dropping backend event for a task that is not pending"
        );
        self.emit(Event::DuplicateDropped { id: task_id });
    }

    /// Number of pipelines currently running
    pub(crate) fn in_flight(&self) -> usize {
        *self.in_flight.borrow()
    }

    /// Wait until no pipeline is running
    pub(crate) async fn wait_idle(&self) {
        let mut rx = self.in_flight.subscribe();
        // The sender lives as long as `self`, so this only returns once idle.
        let _ = rx.wait_for(|n| *n == 0).await;
    }

    /// Relaunch token holder
    pub(crate) fn bridge(&self) -> &Arc<RelaunchBridge> {
        &self.bridge
    }

    fn emit(&self, event: Event) {
        // send() returns Err if there are no receivers, which is fine - we just drop the event
        self.event_tx.send(event).ok();
    }
}
