//! Shared test helpers for creating MediaFetcher instances in tests.

use crate::backend::ManualBackend;
use crate::config::Config;
use crate::destination::{DestinationResolver, FixedDestination};
use crate::error::TranscodeError;
use crate::fetcher::MediaFetcher;
use crate::registry::{Outcome, TransferHandle};
use crate::transcode::{TranscodeCapabilities, Transcoder};
use crate::types::Event;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::{TempDir, tempdir};
use tokio::sync::{Notify, broadcast};

/// Upper bound for anything a test waits on
const WAIT: Duration = Duration::from_secs(5);

/// What the fake transcoder does when called
#[derive(Clone)]
pub(crate) enum FakeBehavior {
    /// Write the output file and succeed
    Succeed,
    /// Fail as a process exiting with this code
    Fail(i32),
    /// Wait for the gate, then succeed
    Gated(Arc<Notify>),
    /// Panic inside the pipeline
    Panic,
}

/// In-process transcoder recording its calls
pub(crate) struct FakeTranscoder {
    behavior: FakeBehavior,
    calls: Mutex<Vec<PathBuf>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl FakeTranscoder {
    pub(crate) fn new(behavior: FakeBehavior) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            calls: Mutex::new(Vec::new()),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
        })
    }

    /// Inputs of every call, in order
    pub(crate) fn calls(&self) -> Vec<PathBuf> {
        self.calls.lock().unwrap().clone()
    }

    /// Highest number of calls observed running at once
    pub(crate) fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

struct ActiveCall<'a>(&'a AtomicUsize);

impl Drop for ActiveCall<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Transcoder for FakeTranscoder {
    async fn transcode(&self, input: &Path, output: &Path) -> Result<PathBuf, TranscodeError> {
        self.calls.lock().unwrap().push(input.to_path_buf());
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        let _active = ActiveCall(&self.active);

        assert!(input.exists(), "transcode input must exist while running");

        match &self.behavior {
            FakeBehavior::Succeed => {}
            FakeBehavior::Fail(code) => return Err(TranscodeError::Exited { code: *code }),
            FakeBehavior::Gated(gate) => gate.notified().await,
            FakeBehavior::Panic => panic!("transcoder blew up"),
        }

        tokio::fs::write(output, b"transcoded").await.unwrap();
        Ok(output.to_path_buf())
    }

    fn capabilities(&self) -> TranscodeCapabilities {
        TranscodeCapabilities {
            can_transcode: true,
        }
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}

/// Configuration with every directory inside `dir` and no PATH search
pub(crate) fn test_config(dir: &Path) -> Config {
    let mut config = Config::default();
    config.download.staging_dir = dir.join("staging");
    config.download.backend_dir = dir.join("backend");
    config.download.output_dir = dir.join("output");
    config.tools.ffmpeg_path = None;
    config.tools.search_path = false;
    config.session.identifier = "test.session".to_string();
    config.session.shutdown_timeout = WAIT;
    config
}

/// A fetcher over a [`ManualBackend`] plus everything a test needs to drive it
pub(crate) struct TestFetcher {
    pub fetcher: MediaFetcher,
    pub backend: Arc<ManualBackend>,
    pub transcoder: Arc<FakeTranscoder>,
    pub events: broadcast::Receiver<Event>,
    /// Keeps the working directories alive
    pub dir: TempDir,
}

impl TestFetcher {
    /// Write a file where the backend would leave a finished transfer
    pub(crate) async fn backend_artifact(&self, name: &str, content: &[u8]) -> PathBuf {
        let backend_dir = self.fetcher.get_config().download.backend_dir.clone();
        tokio::fs::create_dir_all(&backend_dir).await.unwrap();
        let path = backend_dir.join(name);
        tokio::fs::write(&path, content).await.unwrap();
        path
    }

    /// Output directory of the fetcher
    pub(crate) fn output_dir(&self) -> PathBuf {
        self.fetcher.get_config().output_dir().clone()
    }

    /// Wait for the next event matching `predicate`
    pub(crate) async fn wait_for(&mut self, predicate: impl Fn(&Event) -> bool) -> Event {
        wait_for_event(&mut self.events, predicate).await
    }
}

pub(crate) async fn create_test_fetcher(behavior: FakeBehavior) -> TestFetcher {
    create_test_fetcher_with(behavior, |_| {}, Arc::new(FixedDestination::default())).await
}

pub(crate) async fn create_test_fetcher_with(
    behavior: FakeBehavior,
    configure: impl FnOnce(&mut Config),
    destination: Arc<dyn DestinationResolver>,
) -> TestFetcher {
    let dir = tempdir().unwrap();
    let mut config = test_config(dir.path());
    configure(&mut config);

    let (backend, backend_events) = ManualBackend::new();
    let backend = Arc::new(backend);
    let transcoder = FakeTranscoder::new(behavior);

    let fetcher = MediaFetcher::with_parts(
        config,
        backend.clone(),
        backend_events,
        transcoder.clone(),
        destination,
    )
    .await
    .unwrap();
    let events = fetcher.subscribe();

    TestFetcher {
        fetcher,
        backend,
        transcoder,
        events,
        dir,
    }
}

/// Wait for the next event matching `predicate`, skipping the rest
pub(crate) async fn wait_for_event(
    rx: &mut broadcast::Receiver<Event>,
    predicate: impl Fn(&Event) -> bool,
) -> Event {
    tokio::time::timeout(WAIT, async {
        loop {
            match rx.recv().await {
                Ok(event) if predicate(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

/// Await a handle's outcome with a timeout
pub(crate) async fn outcome(handle: TransferHandle) -> Outcome {
    tokio::time::timeout(WAIT, handle)
        .await
        .expect("timed out waiting for outcome")
}
