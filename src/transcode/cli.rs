//! CLI-based transcoder using an external ffmpeg binary

use super::traits::{TranscodeCapabilities, Transcoder};
use crate::error::TranscodeError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::process::Command;

/// Default upper bound on a single transcode run
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3600);

/// How much of the tool's stderr is kept for diagnostics
const STDERR_TAIL: usize = 512;

/// CLI-based transcoder using an external ffmpeg binary
///
/// Produces an H.264/AAC MP4 with the moov atom at the front so the result
/// plays while it is still being read. The process is killed if it exceeds its
/// timeout or if the returned future is dropped.
///
/// # Examples
///
/// ```no_run
/// use media_dl::transcode::{CliTranscoder, Transcoder};
/// use std::path::{Path, PathBuf};
/// use std::time::Duration;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let transcoder = CliTranscoder::new(PathBuf::from("/usr/bin/ffmpeg"))
///     .with_timeout(Duration::from_secs(600));
///
/// let out = transcoder
///     .transcode(Path::new("clip.ts"), Path::new("clip.mp4"))
///     .await?;
/// # let _ = out;
/// # Ok(())
/// # }
/// ```
pub struct CliTranscoder {
    binary_path: PathBuf,
    timeout: Duration,
}

impl CliTranscoder {
    /// Create a new CLI transcoder with an explicit binary path
    pub fn new(binary_path: PathBuf) -> Self {
        Self {
            binary_path,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Attempt to find ffmpeg in PATH
    ///
    /// Returns `None` when the binary cannot be found.
    pub fn from_path() -> Option<Self> {
        which::which("ffmpeg").ok().map(Self::new)
    }

    /// Set the upper bound on a single run
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Path of the binary this transcoder runs
    pub fn binary_path(&self) -> &Path {
        &self.binary_path
    }

    fn command(&self, input: &Path, output: &Path) -> Command {
        let mut cmd = Command::new(&self.binary_path);
        cmd.arg("-i")
            .arg(input)
            .args(["-c:v", "libx264", "-preset", "fast", "-crf", "23"])
            .args(["-c:a", "aac", "-b:a", "128k"])
            .args(["-movflags", "+faststart"])
            .arg("-y")
            .arg(output)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

fn status_error(status: ExitStatus) -> TranscodeError {
    if let Some(code) = status.code() {
        return TranscodeError::Exited { code };
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return TranscodeError::Abnormal {
                reason: format!("terminated by signal {}", signal),
            };
        }
    }

    TranscodeError::Abnormal {
        reason: format!("terminated abnormally ({})", status),
    }
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    let start = text
        .char_indices()
        .map(|(i, _)| i)
        .find(|&i| text.len() - i <= STDERR_TAIL)
        .unwrap_or(text.len());
    text[start..].to_string()
}

#[async_trait]
impl Transcoder for CliTranscoder {
    async fn transcode(&self, input: &Path, output: &Path) -> Result<PathBuf, TranscodeError> {
        tracing::debug!(
            input = %input.display(),
            output = %output.display(),
            binary = %self.binary_path.display(),
            "starting transcode"
        );

        let run = self.command(input, output).output();
        let result = match tokio::time::timeout(self.timeout, run).await {
            Ok(result) => result,
            Err(_) => {
                return Err(TranscodeError::TimedOut {
                    secs: self.timeout.as_secs(),
                });
            }
        };

        let finished = result.map_err(|e| {
            TranscodeError::Launch(format!(
                "failed to execute {}: {}",
                self.binary_path.display(),
                e
            ))
        })?;

        if !finished.status.success() {
            let err = status_error(finished.status);
            tracing::warn!(
                input = %input.display(),
                error = %err,
                stderr = %stderr_tail(&finished.stderr),
                "transcode failed"
            );
            return Err(err);
        }

        if !tokio::fs::try_exists(output).await.unwrap_or(false) {
            return Err(TranscodeError::Abnormal {
                reason: format!(
                    "reported success but produced no output at {}",
                    output.display()
                ),
            });
        }

        Ok(output.to_path_buf())
    }

    fn capabilities(&self) -> TranscodeCapabilities {
        TranscodeCapabilities {
            can_transcode: true,
        }
    }

    fn name(&self) -> &'static str {
        "cli-ffmpeg"
    }
}
