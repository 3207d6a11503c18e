//! Configuration types for media-dl

use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

/// Directory layout and transfer behaviour
///
/// Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Router-owned staging directory for artifacts awaiting processing (default: "./temp")
    ///
    /// Treated as ephemeral: nothing in it is relied upon across restarts.
    #[serde(default = "default_staging_dir")]
    pub staging_dir: PathBuf,

    /// Directory the HTTP backend writes in-progress transfers to (default: "./temp/transfers")
    #[serde(default = "default_backend_dir")]
    pub backend_dir: PathBuf,

    /// Stable, non-temporary directory final artifacts are handed off from (default: "./downloads")
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// File collision handling in `output_dir`
    #[serde(default)]
    pub file_collision: FileCollisionAction,

    /// Minimum progress delta between two progress events for one transfer (default: 0.01)
    #[serde(default = "default_progress_step")]
    pub progress_step: f32,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            staging_dir: default_staging_dir(),
            backend_dir: default_backend_dir(),
            output_dir: default_output_dir(),
            file_collision: FileCollisionAction::default(),
            progress_step: default_progress_step(),
        }
    }
}

/// External tool paths
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Path to ffmpeg executable (auto-detected if None)
    #[serde(default)]
    pub ffmpeg_path: Option<PathBuf>,

    /// Whether to search PATH for ffmpeg if no explicit path is set (default: true)
    #[serde(default = "default_true")]
    pub search_path: bool,

    /// Maximum runtime of one transcode before it is killed (default: 1 hour)
    #[serde(default = "default_transcode_timeout", with = "duration_serde")]
    pub transcode_timeout: Duration,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: None,
            search_path: true,
            transcode_timeout: default_transcode_timeout(),
        }
    }
}

/// Normalization policy settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TranscodeConfig {
    /// Source extensions that need normalization (compared case-insensitively)
    ///
    /// Any extension not listed, and sources with no extension, are treated as
    /// already normalized.
    #[serde(default = "default_normalize_extensions")]
    pub normalize_extensions: Vec<String>,

    /// Extension of the transcode output (default: "mp4")
    #[serde(default = "default_output_extension")]
    pub output_extension: String,

    /// Number of transcodes allowed to run at once (default: 2)
    #[serde(default = "default_max_concurrent_transcodes")]
    pub max_concurrent_transcodes: usize,
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        Self {
            normalize_extensions: default_normalize_extensions(),
            output_extension: default_output_extension(),
            max_concurrent_transcodes: default_max_concurrent_transcodes(),
        }
    }
}

/// Background session settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Well-known identifier of the background transfer session
    ///
    /// Relaunch tokens are only held when they name this session.
    #[serde(default = "default_session_identifier")]
    pub identifier: String,

    /// How long shutdown waits for running pipelines (default: 30 seconds)
    #[serde(default = "default_shutdown_timeout", with = "duration_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            identifier: default_session_identifier(),
            shutdown_timeout: default_shutdown_timeout(),
        }
    }
}

/// Retry configuration for transient connect failures in the HTTP backend
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay before first retry (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 30 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

/// File collision handling
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileCollisionAction {
    /// Append (1), (2), etc. to filename (default)
    #[default]
    Rename,
    /// Overwrite existing file
    Overwrite,
    /// Refuse to finalize over an existing file
    Skip,
}

/// Main configuration for [`MediaFetcher`](crate::MediaFetcher)
///
/// Sub-configs are flattened, so the serialized form has no nesting.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Directory layout and transfer behaviour
    #[serde(flatten)]
    pub download: DownloadConfig,

    /// External tool paths
    #[serde(flatten)]
    pub tools: ToolsConfig,

    /// Normalization policy
    #[serde(flatten)]
    pub transcode: TranscodeConfig,

    /// Background session settings
    #[serde(default)]
    pub session: SessionConfig,

    /// Backend retry behaviour
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Config {
    /// Stable output directory
    pub fn output_dir(&self) -> &PathBuf {
        &self.download.output_dir
    }

    /// Staging directory
    pub fn staging_dir(&self) -> &PathBuf {
        &self.download.staging_dir
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> crate::Result<()> {
        if self.transcode.max_concurrent_transcodes == 0 {
            return Err(crate::Error::Config {
                message: "max_concurrent_transcodes must be at least 1".into(),
                key: Some("max_concurrent_transcodes".into()),
            });
        }
        if self.transcode.output_extension.trim_start_matches('.').is_empty() {
            return Err(crate::Error::Config {
                message: "output_extension must not be empty".into(),
                key: Some("output_extension".into()),
            });
        }
        if self.session.identifier.is_empty() {
            return Err(crate::Error::Config {
                message: "session identifier must not be empty".into(),
                key: Some("session.identifier".into()),
            });
        }
        if !(0.0..=1.0).contains(&self.download.progress_step) {
            return Err(crate::Error::Config {
                message: "progress_step must be within [0, 1]".into(),
                key: Some("progress_step".into()),
            });
        }
        Ok(())
    }

    /// Parse and validate a JSON configuration
    ///
    /// Missing keys take their defaults, so `{}` is a valid configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Serialization`](crate::Error::Serialization) for
    /// malformed JSON and [`Error::Config`](crate::Error::Config) for values
    /// [`validate`](Self::validate) rejects.
    pub fn from_json(json: &str) -> crate::Result<Self> {
        let config: Config = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read a JSON configuration file
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be read, otherwise see
    /// [`from_json`](Self::from_json).
    pub async fn load(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let json = tokio::fs::read_to_string(path).await?;
        Self::from_json(&json)
    }
}

// Default value functions
fn default_staging_dir() -> PathBuf {
    PathBuf::from("temp")
}

fn default_backend_dir() -> PathBuf {
    PathBuf::from("temp").join("transfers")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("downloads")
}

fn default_progress_step() -> f32 {
    0.01
}

fn default_true() -> bool {
    true
}

fn default_transcode_timeout() -> Duration {
    Duration::from_secs(60 * 60)
}

fn default_normalize_extensions() -> Vec<String> {
    vec![
        "m3u8".into(),
        "mpd".into(),
        "ts".into(),
        "mkv".into(),
        "webm".into(),
        "avi".into(),
        "flv".into(),
        "wmv".into(),
    ]
}

fn default_output_extension() -> String {
    "mp4".into()
}

fn default_max_concurrent_transcodes() -> usize {
    2
}

fn default_session_identifier() -> String {
    "media-dl.background-session".into()
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

// Duration serialization helper (whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_json_yields_defaults() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config.download.output_dir, PathBuf::from("downloads"));
        assert_eq!(config.download.staging_dir, PathBuf::from("temp"));
        assert_eq!(config.transcode.output_extension, "mp4");
        assert_eq!(config.transcode.max_concurrent_transcodes, 2);
        assert_eq!(config.session.identifier, "media-dl.background-session");
        assert!(config.tools.search_path);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn flattened_fields_sit_at_top_level() {
        let json = serde_json::to_value(Config::default()).unwrap();
        assert!(json.get("output_dir").is_some());
        assert!(json.get("normalize_extensions").is_some());
        assert!(json.get("ffmpeg_path").is_some());
        assert!(json.get("download").is_none());
        assert_eq!(json["transcode_timeout"], 3600);
    }

    #[test]
    fn durations_round_trip_as_seconds() {
        let json = r#"{"session": {"identifier": "com.example.bg", "shutdown_timeout": 5}}"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.session.shutdown_timeout, Duration::from_secs(5));
        assert_eq!(config.session.identifier, "com.example.bg");

        let back = serde_json::to_string(&config).unwrap();
        let again: Config = serde_json::from_str(&back).unwrap();
        assert_eq!(again.session.shutdown_timeout, Duration::from_secs(5));
    }

    #[test]
    fn zero_transcode_workers_is_rejected() {
        let mut config = Config::default();
        config.transcode.max_concurrent_transcodes = 0;
        match config.validate() {
            Err(crate::Error::Config { key, .. }) => {
                assert_eq!(key.as_deref(), Some("max_concurrent_transcodes"))
            }
            other => panic!("expected Config error, got {other:?}"),
        }
    }

    #[test]
    fn out_of_range_progress_step_is_rejected() {
        let mut config = Config::default();
        config.download.progress_step = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn from_json_validates() {
        assert!(Config::from_json(r#"{"output_extension": "mkv"}"#).is_ok());
        assert!(matches!(
            Config::from_json(r#"{"max_concurrent_transcodes": 0}"#),
            Err(crate::Error::Config { .. })
        ));
        assert!(matches!(
            Config::from_json("{not json"),
            Err(crate::Error::Serialization(_))
        ));
    }

    #[tokio::test]
    async fn load_reads_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("media-dl.json");
        tokio::fs::write(&path, r#"{"output_dir": "/srv/media"}"#)
            .await
            .unwrap();

        let config = Config::load(&path).await.unwrap();

        assert_eq!(config.output_dir(), &PathBuf::from("/srv/media"));
        assert!(Config::load(dir.path().join("missing.json")).await.is_err());
    }

    #[test]
    fn collision_action_uses_snake_case() {
        let action: FileCollisionAction = serde_json::from_str(r#""overwrite""#).unwrap();
        assert_eq!(action, FileCollisionAction::Overwrite);
    }
}
