//! # media-dl
//!
//! Background media transfers with a post-processing pipeline.
//!
//! A [`MediaFetcher`] hands remote resources to a [`TransferBackend`] that
//! runs the transfers on its own schedule, correlates the backend's
//! completion events with the requests that started them, optionally
//! normalizes the result with an external transcoder, and delivers the final
//! file to a stable location.
//!
//! ## Guarantees
//!
//! - Every [`TransferHandle`] resolves exactly once
//! - Temporary files are removed on every exit path, including cancellation
//! - Replayed backend events for finished transfers are dropped without side
//!   effects
//! - A relaunch token is only completed once the backend's session is drained
//!   and every pipeline it started has finished
//!
//! ## Quick Start
//!
//! ```no_run
//! use media_dl::{Config, MediaFetcher};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let fetcher = MediaFetcher::with_http_backend(Config::default()).await?;
//!
//!     // Subscribe to events
//!     let mut events = fetcher.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let handle = fetcher.fetch("https://example.com/live/stream.m3u8").await?;
//!     let delivery = handle.outcome().await?;
//!     println!("delivered {}", delivery.path.display());
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Transfer backends and their event stream
pub mod backend;
/// Configuration types
pub mod config;
/// Destination resolution for finished artifacts
pub mod destination;
/// Error types
pub mod error;
/// Fetcher facade (decomposed into focused submodules)
pub mod fetcher;
/// Source normalization policy
pub mod policy;
/// Registry of in-flight transfers
pub mod registry;
/// Background relaunch hand-off
pub mod relaunch;
/// Retry logic with exponential backoff
pub mod retry;
/// Completion router and post-processing pipeline
mod router;
/// Router-owned temporary files
pub mod staging;
/// Media normalization step
pub mod transcode;
/// Core types and events
pub mod types;
/// Utility functions
pub mod utils;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;

// Re-export commonly used types
pub use backend::{BackendEvent, HttpBackend, ManualBackend, TransferBackend};
pub use config::Config;
pub use destination::{DestinationResolver, FixedDestination};
pub use error::{Error, FetchError, Result, SubmissionError, TranscodeError};
pub use fetcher::MediaFetcher;
pub use policy::{NormalizePolicy, Plan};
pub use registry::{Outcome, PendingView, TransferHandle};
pub use relaunch::SessionCompletionToken;
pub use transcode::{CliTranscoder, NoOpTranscoder, TranscodeCapabilities, Transcoder};
pub use types::{
    Capabilities, Delivery, DestinationKind, EntryState, Event, SourceKind, TaskId,
    TransferRequest,
};

/// Helper function to run the fetcher with graceful signal handling.
///
/// Waits for a termination signal and then calls the fetcher's `shutdown()` method.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use media_dl::{Config, MediaFetcher, run_with_shutdown};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let fetcher = MediaFetcher::with_http_backend(Config::default()).await?;
///
///     // Run with automatic signal handling
///     run_with_shutdown(fetcher).await?;
///
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(fetcher: MediaFetcher) -> Result<()> {
    wait_for_signal().await;
    fetcher.shutdown().await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Signal registration may fail in restricted environments (containers, tests)
    match (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => tracing::info!("Received SIGTERM signal"),
                _ = sigint.recv() => tracing::info!("Received SIGINT signal (Ctrl+C)"),
            }
        }
        (Ok(mut sigterm), Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            sigterm.recv().await;
            tracing::info!("Received SIGTERM signal");
        }
        (Err(e), Ok(mut sigint)) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            sigint.recv().await;
            tracing::info!("Received SIGINT signal (Ctrl+C)");
        }
        (Err(e), Err(_)) => {
            tracing::error!(error = %e, "Could not register any signal handlers, using ctrl_c fallback");
            tokio::signal::ctrl_c().await.ok();
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Received Ctrl+C signal"),
        Err(e) => tracing::error!(error = %e, "Failed to listen for Ctrl+C signal"),
    }
}
