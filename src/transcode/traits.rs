//! Traits and types for the transcode step

use crate::error::TranscodeError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Capabilities of a transcoder implementation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TranscodeCapabilities {
    /// Can normalize media
    pub can_transcode: bool,
}

/// Trait for the media normalization step
///
/// # Contract
///
/// - Success means the process reported success *and* the artifact exists at
///   `output`; anything else is a [`TranscodeError`].
/// - A non-zero exit is reported as [`TranscodeError::Exited`] with the
///   process's code, never as success.
/// - `input` is never deleted or modified.
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Normalize `input` into `output`, returning the output path
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The external process cannot be launched
    /// - The process exits unsuccessfully or is killed
    /// - The process exceeds its timeout
    /// - No output artifact was produced
    async fn transcode(&self, input: &Path, output: &Path) -> Result<PathBuf, TranscodeError>;

    /// Query capabilities of this transcoder
    fn capabilities(&self) -> TranscodeCapabilities;

    /// Human-readable name for logging
    fn name(&self) -> &'static str;
}
