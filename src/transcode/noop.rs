//! No-op transcoder for graceful degradation

use super::traits::{TranscodeCapabilities, Transcoder};
use crate::error::TranscodeError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Transcoder used when no ffmpeg binary is available or configured
///
/// Every call fails with [`TranscodeError::Unavailable`], so sources that need
/// normalization fail cleanly while pass-through sources keep working.
///
/// # Examples
///
/// ```
/// use media_dl::transcode::{NoOpTranscoder, Transcoder};
/// use std::path::Path;
///
/// # #[tokio::main]
/// # async fn main() {
/// let result = NoOpTranscoder
///     .transcode(Path::new("clip.ts"), Path::new("clip.mp4"))
///     .await;
/// assert!(result.is_err());
/// # }
/// ```
pub struct NoOpTranscoder;

#[async_trait]
impl Transcoder for NoOpTranscoder {
    async fn transcode(&self, _input: &Path, _output: &Path) -> Result<PathBuf, TranscodeError> {
        Err(TranscodeError::Unavailable(
            "transcoding requires an external ffmpeg binary. \
             Configure ffmpeg_path in config or ensure ffmpeg is in PATH."
                .into(),
        ))
    }

    fn capabilities(&self) -> TranscodeCapabilities {
        TranscodeCapabilities {
            can_transcode: false,
        }
    }

    fn name(&self) -> &'static str {
        "noop"
    }
}
