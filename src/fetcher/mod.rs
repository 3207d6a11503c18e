//! Core fetcher implementation split into focused submodules.

mod control;
mod lifecycle;


use crate::backend::{BackendEvents, HttpBackend, TransferBackend};
use crate::config::Config;
use crate::destination::{DestinationResolver, FixedDestination};
use crate::error::{Error, Result};
use crate::policy::NormalizePolicy;
use crate::registry::TransferRegistry;
use crate::relaunch::RelaunchBridge;
use crate::router::{CompletionRouter, RouterParams};
use crate::transcode::{self, Transcoder};
use crate::types::{Capabilities, Event};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use tokio_util::sync::CancellationToken;

/// Capacity of the lifecycle event broadcast channel
const EVENT_CHANNEL_CAPACITY: usize = 1000;

/// Entry point of the crate (cloneable - all fields are Arc-wrapped)
///
/// Owns the single [`TransferRegistry`] of the process and the completion
/// router consuming the backend's events. Construct it once at startup and
/// pass clones to whatever needs to start or observe transfers.
#[derive(Clone)]
pub struct MediaFetcher {
    /// Registry of in-flight transfers
    pub(crate) registry: Arc<TransferRegistry>,
    /// Completion router (pipelines, relaunch bridge)
    pub(crate) router: CompletionRouter,
    /// Event broadcast channel sender (multiple subscribers supported)
    pub(crate) event_tx: tokio::sync::broadcast::Sender<Event>,
    /// Configuration (wrapped in Arc for sharing across tasks)
    pub(crate) config: Arc<Config>,
    /// Transcode step, kept for capability reporting
    pub(crate) transcoder: Arc<dyn Transcoder>,
    /// Flag to indicate whether new transfers are accepted (set to false during shutdown)
    pub(crate) accepting_new: Arc<AtomicBool>,
    /// Stops the router's event loop
    pub(crate) shutdown_token: CancellationToken,
}

impl MediaFetcher {
    /// Create a fetcher on top of `backend`
    ///
    /// The transcoder is selected from configuration (explicit `ffmpeg_path`,
    /// then a PATH search, then none) and every artifact goes to
    /// [`FixedDestination::default`].
    ///
    /// `events` must be the receiving half of the channel `backend` reports
    /// on.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the working
    /// directories cannot be created.
    pub async fn new(
        config: Config,
        backend: Arc<dyn TransferBackend>,
        events: BackendEvents,
    ) -> Result<Self> {
        let transcoder = transcode::from_config(&config);
        Self::with_parts(
            config,
            backend,
            events,
            transcoder,
            Arc::new(FixedDestination::default()),
        )
        .await
    }

    /// Create a fetcher backed by the bundled HTTP backend
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use media_dl::{Config, MediaFetcher};
    ///
    /// #[tokio::main]
    /// async fn main() -> Result<(), Box<dyn std::error::Error>> {
    ///     let fetcher = MediaFetcher::with_http_backend(Config::default()).await?;
    ///
    ///     let handle = fetcher.fetch("https://example.com/media/movie.mp4").await?;
    ///     match handle.outcome().await {
    ///         Ok(delivery) => println!("saved to {}", delivery.path.display()),
    ///         Err(e) => eprintln!("transfer failed: {}", e),
    ///     }
    ///
    ///     fetcher.shutdown().await?;
    ///     Ok(())
    /// }
    /// ```
    pub async fn with_http_backend(config: Config) -> Result<Self> {
        let (backend, events) = HttpBackend::new(&config)?;
        Self::new(config, Arc::new(backend), events).await
    }

    /// Create a fetcher with an explicit transcoder and destination resolver
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the working
    /// directories cannot be created.
    pub async fn with_parts(
        config: Config,
        backend: Arc<dyn TransferBackend>,
        events: BackendEvents,
        transcoder: Arc<dyn Transcoder>,
        destination: Arc<dyn DestinationResolver>,
    ) -> Result<Self> {
        config.validate()?;
        create_dir(config.staging_dir(), "staging").await?;
        create_dir(config.output_dir(), "output").await?;

        let transcode_caps = transcoder.capabilities();
        tracing::info!(
            backend = backend.name(),
            transcoder = transcoder.name(),
            can_transcode = transcode_caps.can_transcode,
            "media fetcher initialized"
        );

        // Create broadcast channel with buffer size of 1000 events
        // This allows multiple subscribers to receive all events independently
        let (event_tx, _rx) = tokio::sync::broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let config = Arc::new(config);
        let registry = Arc::new(TransferRegistry::new(backend));
        let bridge = Arc::new(RelaunchBridge::new(config.session.identifier.clone()));

        let router = CompletionRouter::new(RouterParams {
            registry: registry.clone(),
            policy: NormalizePolicy::from_config(&config.transcode),
            transcoder: transcoder.clone(),
            destination,
            bridge,
            config: config.clone(),
            event_tx: event_tx.clone(),
        });

        let shutdown_token = CancellationToken::new();
        router.clone().spawn(events, shutdown_token.clone());

        Ok(Self {
            registry,
            router,
            event_tx,
            config,
            transcoder,
            accepting_new: Arc::new(AtomicBool::new(true)),
            shutdown_token,
        })
    }

    /// Subscribe to lifecycle events
    ///
    /// Multiple subscribers are supported. Each subscriber receives all events
    /// independently. A subscriber that falls behind by more than 1000 events
    /// receives `RecvError::Lagged`.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Get the current configuration
    pub fn get_config(&self) -> Arc<Config> {
        Arc::clone(&self.config)
    }

    /// Query whether sources that need normalization can be processed
    pub fn capabilities(&self) -> Capabilities {
        Capabilities {
            can_transcode: self.transcoder.capabilities().can_transcode,
            transcoder: self.transcoder.name().to_string(),
        }
    }

    /// Emit an event to all subscribers
    pub(crate) fn emit_event(&self, event: Event) {
        // send() returns Err if there are no receivers, which is fine - we just drop the event
        self.event_tx.send(event).ok();
    }
}

async fn create_dir(path: &Path, what: &str) -> Result<()> {
    tokio::fs::create_dir_all(path).await.map_err(|e| {
        Error::Io(std::io::Error::new(
            e.kind(),
            format!(
                "Failed to create {} directory '{}': {}",
                what,
                path.display(),
                e
            ),
        ))
    })
}
