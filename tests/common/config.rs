//! Test configuration helpers for creating fetchers over a mock HTTP server

use media_dl::{
    Config, DestinationResolver, FixedDestination, HttpBackend, MediaFetcher, NoOpTranscoder,
    Transcoder,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Configuration with every directory inside `dir`
///
/// PATH search is disabled so results never depend on an installed ffmpeg,
/// and retries are turned off so failures surface immediately.
pub fn test_config(dir: &Path) -> Config {
    let mut config = Config::default();
    config.download.staging_dir = dir.join("staging");
    config.download.backend_dir = dir.join("transfers");
    config.download.output_dir = dir.join("downloads");
    config.tools.search_path = false;
    config.session.identifier = "e2e.session".to_string();
    config.session.shutdown_timeout = Duration::from_secs(5);
    config.retry.max_attempts = 0;
    config
}

/// Create a fetcher over the HTTP backend with the given transcoder
///
/// Returns the fetcher and temp directory (keep temp_dir alive for test duration)
pub async fn create_http_fetcher(transcoder: Arc<dyn Transcoder>) -> (MediaFetcher, TempDir) {
    let temp_dir = tempfile::tempdir().unwrap();
    let config = test_config(temp_dir.path());
    let (backend, events) = HttpBackend::new(&config).unwrap();
    let destination: Arc<dyn DestinationResolver> = Arc::new(FixedDestination::default());
    let fetcher = MediaFetcher::with_parts(config, Arc::new(backend), events, transcoder, destination)
        .await
        .unwrap();
    (fetcher, temp_dir)
}

/// Create a fetcher that cannot transcode
pub async fn create_plain_fetcher() -> (MediaFetcher, TempDir) {
    create_http_fetcher(Arc::new(NoOpTranscoder)).await
}

/// Write an executable shell script standing in for ffmpeg
///
/// The script sees the real command line: `-i <input> ... -y <output>`.
#[cfg(unix)]
pub fn fake_ffmpeg(dir: &Path, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join("fake-ffmpeg");
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}
