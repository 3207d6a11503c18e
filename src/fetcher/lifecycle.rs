//! Relaunch hand-off and shutdown coordination.

use crate::error::Result;
use crate::relaunch::SessionCompletionToken;
use crate::types::Event;
use std::sync::atomic::Ordering;

use super::MediaFetcher;

impl MediaFetcher {
    /// Hand over the continuation the host supplied on a background relaunch
    ///
    /// The token is completed once the backend reports that every event of
    /// the session was delivered and every pipeline started for those events
    /// has finished. A token whose `identifier` is not the configured session
    /// is completed immediately.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use media_dl::{Config, MediaFetcher};
    /// use media_dl::relaunch::SessionCompletionToken;
    ///
    /// # async fn example(fetcher: MediaFetcher) {
    /// let identifier = fetcher.get_config().session.identifier.clone();
    /// fetcher.handle_background_events(SessionCompletionToken::new(identifier, || {
    ///     println!("host may suspend the process now");
    /// }));
    /// # }
    /// ```
    pub fn handle_background_events(&self, token: SessionCompletionToken) -> bool {
        tracing::info!(identifier = %token.identifier(), "background relaunch");
        self.router.bridge().attach(token)
    }

    /// Gracefully shut down the fetcher
    ///
    /// This method performs a graceful shutdown sequence:
    /// 1. Stops accepting new transfers and closes the backend
    /// 2. Cancels every pending transfer
    /// 3. Waits for running pipelines to finish their cleanup (bounded by
    ///    `session.shutdown_timeout`)
    /// 4. Stops the completion router and completes any held relaunch token
    ///
    /// # Errors
    ///
    /// Currently infallible; the `Result` leaves room for backends whose close
    /// can fail.
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("Initiating graceful shutdown");

        // 1. Stop accepting new transfers
        self.accepting_new.store(false, Ordering::SeqCst);
        self.registry.backend().close();
        tracing::info!("Stopped accepting new transfers");

        // 2. Cancel everything in flight
        let cancelled = self.cancel_all().await;
        tracing::info!(cancelled, "Cancelled pending transfers");

        // 3. Wait for pipelines to clean up
        let timeout = self.config.session.shutdown_timeout;
        match tokio::time::timeout(timeout, self.router.wait_idle()).await {
            Ok(()) => tracing::info!("All pipelines finished"),
            Err(_) => tracing::warn!(
                in_flight = self.router.in_flight(),
                "Timeout waiting for pipelines to finish, proceeding with shutdown"
            ),
        }

        // 4. Stop the router and let the host go
        self.shutdown_token.cancel();
        if self.router.bridge().release() {
            tracing::info!("Completed held relaunch token during shutdown");
        }

        self.emit_event(Event::Shutdown);
        tracing::info!("Graceful shutdown complete");
        Ok(())
    }

    /// Cancel every pending transfer; returns how many were affected
    pub async fn cancel_all(&self) -> usize {
        let mut cancelled = 0;
        for task_id in self.registry.task_ids().await {
            if self.cancel(task_id).await.is_ok() {
                cancelled += 1;
            }
        }
        cancelled
    }
}
