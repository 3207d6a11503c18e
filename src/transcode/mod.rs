//! Media normalization step
//!
//! This module provides a trait-based architecture for the transcode step. It
//! supports a CLI implementation (an external ffmpeg binary) and a stub for
//! graceful degradation when no transcoder is available.
//!
//! ## Architecture
//!
//! The core abstraction is the [`Transcoder`] trait. Implementations:
//!
//! - [`CliTranscoder`]: runs an external `ffmpeg` process
//! - [`NoOpTranscoder`]: reports transcoding as unavailable
//!
//! A transcoder never deletes its input; the caller owns it.
//!
//! ## Usage
//!
//! ```no_run
//! use media_dl::transcode::{CliTranscoder, Transcoder};
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let transcoder = CliTranscoder::from_path()
//!         .expect("ffmpeg binary not found");
//!
//!     let output = transcoder
//!         .transcode(Path::new("clip.ts"), Path::new("clip.mp4"))
//!         .await?;
//!     println!("normalized: {}", output.display());
//!     Ok(())
//! }
//! ```

mod cli;
mod noop;
mod traits;

pub use cli::CliTranscoder;
pub use noop::NoOpTranscoder;
pub use traits::{TranscodeCapabilities, Transcoder};

use crate::config::Config;
use std::sync::Arc;

/// Select a transcoder according to configuration
///
/// An explicit `ffmpeg_path` wins; otherwise PATH is searched when allowed;
/// otherwise the no-op transcoder is used.
pub fn from_config(config: &Config) -> Arc<dyn Transcoder> {
    let timeout = config.tools.transcode_timeout;
    if let Some(ref ffmpeg_path) = config.tools.ffmpeg_path {
        Arc::new(CliTranscoder::new(ffmpeg_path.clone()).with_timeout(timeout))
    } else if config.tools.search_path {
        CliTranscoder::from_path()
            .map(|t| Arc::new(t.with_timeout(timeout)) as Arc<dyn Transcoder>)
            .unwrap_or_else(|| Arc::new(NoOpTranscoder))
    } else {
        Arc::new(NoOpTranscoder)
    }
}
