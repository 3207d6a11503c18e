//! reqwest-based transfer backend

use super::{BackendEvent, BackendEvents, EventSender, TransferBackend, event_channel};
use crate::config::{Config, RetryConfig};
use crate::error::{Error, Result, SubmissionError};
use crate::retry::with_retry;
use crate::types::TaskId;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Transfer backend that fetches `http`/`https` locators with reqwest
///
/// Each submission runs on its own tokio task and streams the body into
/// `backend_dir`. The finished file is reported with
/// [`BackendEvent::Completed`]; partial files of failed or cancelled
/// transfers are removed before [`BackendEvent::Failed`] is sent. Whenever the
/// last running transfer finishes, [`BackendEvent::SessionDrained`] follows
/// its terminal event.
#[derive(Clone)]
pub struct HttpBackend {
    inner: Arc<Inner>,
}

struct Inner {
    client: reqwest::Client,
    dir: PathBuf,
    retry: RetryConfig,
    events: EventSender,
    next_id: AtomicU64,
    active: Mutex<HashMap<TaskId, CancellationToken>>,
    closed: AtomicBool,
}

impl HttpBackend {
    /// Create a backend writing into `config.download.backend_dir`
    ///
    /// Returns the backend and the receiving half of its event channel.
    pub fn new(config: &Config) -> Result<(Self, BackendEvents)> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("media-dl/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self::with_client(
            client,
            config.download.backend_dir.clone(),
            config.retry.clone(),
        ))
    }

    /// Create a backend around an existing client
    pub fn with_client(
        client: reqwest::Client,
        dir: PathBuf,
        retry: RetryConfig,
    ) -> (Self, BackendEvents) {
        let (events, rx) = event_channel();
        let backend = Self {
            inner: Arc::new(Inner {
                client,
                dir,
                retry,
                events,
                next_id: AtomicU64::new(1),
                active: Mutex::new(HashMap::new()),
                closed: AtomicBool::new(false),
            }),
        };
        (backend, rx)
    }

    /// Number of transfers currently running
    pub fn active_count(&self) -> usize {
        self.inner.active_map().len()
    }
}

impl Inner {
    fn active_map(&self) -> std::sync::MutexGuard<'_, HashMap<TaskId, CancellationToken>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn partial_path(&self, task_id: TaskId) -> PathBuf {
        self.dir.join(format!("transfer-{}.part", task_id))
    }

    async fn run(self: Arc<Self>, task_id: TaskId, uri: Url, token: CancellationToken) {
        let path = self.partial_path(task_id);

        let result = tokio::select! {
            r = self.fetch(task_id, &uri, &path) => r,
            _ = token.cancelled() => Err(Error::Other("transfer cancelled".into())),
        };

        let event = match result {
            Ok(()) => {
                tracing::debug!(task_id = task_id.0, ?path, "transfer finished");
                BackendEvent::Completed {
                    task_id,
                    location: path,
                }
            }
            Err(e) => {
                tracing::debug!(task_id = task_id.0, error = %e, "transfer failed");
                if let Err(remove_err) = tokio::fs::remove_file(&path).await
                    && remove_err.kind() != std::io::ErrorKind::NotFound
                {
                    tracing::warn!(task_id = task_id.0, ?path, error = %remove_err, "failed to remove partial transfer");
                }
                BackendEvent::Failed {
                    task_id,
                    error: e.to_string(),
                }
            }
        };

        self.events.send(event).ok();

        let drained = {
            let mut active = self.active_map();
            active.remove(&task_id);
            active.is_empty()
        };
        if drained {
            self.events.send(BackendEvent::SessionDrained).ok();
        }
    }

    async fn fetch(&self, task_id: TaskId, uri: &Url, path: &Path) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let mut response = with_retry(&self.retry, || self.client.get(uri.clone()).send())
            .await?
            .error_for_status()?;

        let total = response.content_length().filter(|t| *t > 0);
        let mut file = tokio::fs::File::create(path).await?;
        let mut received: u64 = 0;
        let mut last_percent: u64 = 0;

        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk).await?;
            received += chunk.len() as u64;

            if let Some(total) = total {
                let percent = (received.min(total) * 100) / total;
                if percent > last_percent {
                    last_percent = percent;
                    self.events
                        .send(BackendEvent::Progress {
                            task_id,
                            fraction: percent as f32 / 100.0,
                        })
                        .ok();
                }
            }
        }

        file.flush().await?;
        file.sync_all().await?;
        Ok(())
    }
}

impl TransferBackend for HttpBackend {
    fn submit(&self, uri: &Url) -> std::result::Result<TaskId, SubmissionError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(SubmissionError::Closed);
        }
        if !matches!(uri.scheme(), "http" | "https") {
            return Err(SubmissionError::UnsupportedUri {
                uri: uri.to_string(),
                reason: format!("scheme '{}' is not supported", uri.scheme()),
            });
        }
        if uri.host_str().is_none_or(str::is_empty) {
            return Err(SubmissionError::UnsupportedUri {
                uri: uri.to_string(),
                reason: "locator has no host".into(),
            });
        }
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|_| SubmissionError::Rejected("no async runtime available".into()))?;

        let task_id = TaskId(self.inner.next_id.fetch_add(1, Ordering::SeqCst));
        let token = CancellationToken::new();
        self.inner.active_map().insert(task_id, token.clone());

        tracing::debug!(task_id = task_id.0, %uri, "transfer submitted");
        handle.spawn(self.inner.clone().run(task_id, uri.clone(), token));

        Ok(task_id)
    }

    fn cancel(&self, task_id: TaskId) {
        if let Some(token) = self.inner.active_map().get(&task_id) {
            tracing::debug!(task_id = task_id.0, "cancelling transfer");
            token.cancel();
        }
    }

    fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        for token in self.inner.active_map().values() {
            token.cancel();
        }
    }

    fn name(&self) -> &'static str {
        "http"
    }
}
