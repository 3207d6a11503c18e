//! Router-owned temporary files
//!
//! A backend's completion location is only valid until the backend reuses it,
//! so the first thing the router does with a finished transfer is move it into
//! its own staging directory under a fresh name. The resulting
//! [`StagedArtifact`] deletes its file when dropped. The pipeline discards
//! its files explicitly; the drop cleanup is the fallback for paths that
//! never reach that code, such as a panic or a cancelled task being dropped.

use crate::error::{Error, Result};
use crate::utils::move_file;
use std::path::{Path, PathBuf};

/// Prefix of every staged file name
const STAGED_PREFIX: &str = "stg-";

/// A file in the staging directory, deleted on drop unless handed off
#[derive(Debug)]
pub struct StagedArtifact {
    path: PathBuf,
    armed: bool,
}

impl StagedArtifact {
    /// Move the backend's artifact at `location` into `staging_dir`
    ///
    /// The new name is unique (`stg-<uuid>`) and keeps the extension of
    /// `extension_hint` so tools that sniff by extension still work.
    ///
    /// # Errors
    ///
    /// Returns an error if the staging directory cannot be created or the move
    /// fails. The backend's file is left untouched on failure.
    pub async fn stage(
        location: &Path,
        staging_dir: &Path,
        extension_hint: Option<&str>,
    ) -> Result<Self> {
        tokio::fs::create_dir_all(staging_dir).await?;

        let path = staged_path(staging_dir, extension_hint);
        move_file(location, &path).await?;
        tracing::debug!(from = ?location, to = ?path, "artifact staged");

        Ok(Self { path, armed: true })
    }

    /// Claim a fresh name in `staging_dir` for a file that does not exist yet
    ///
    /// Used as the transcode output, so nothing is written to the output
    /// directory until the result is known.
    pub fn scratch(staging_dir: &Path, extension: Option<&str>) -> Self {
        Self::adopt(staged_path(staging_dir, extension))
    }

    /// Take ownership of a file the router produced itself
    ///
    /// Used for transcode output, which must not outlive a failed or
    /// cancelled pipeline either.
    pub fn adopt(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    /// Hand the file off where it is, consuming the guard
    pub fn keep(mut self) -> PathBuf {
        self.armed = false;
        std::mem::take(&mut self.path)
    }

    /// Current location of the staged file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Move the staged file to `destination`, consuming the guard
    ///
    /// On failure the guard is returned so the file is still cleaned up.
    ///
    /// # Errors
    ///
    /// Returns the move error together with the still-armed guard.
    pub async fn persist(mut self, destination: &Path) -> std::result::Result<PathBuf, (Error, Self)> {
        match move_file(&self.path, destination).await {
            Ok(()) => {
                self.armed = false;
                Ok(destination.to_path_buf())
            }
            Err(e) => Err((e, self)),
        }
    }

    /// Delete the staged file now
    ///
    /// Idempotent with respect to the drop cleanup: the file is removed at most
    /// once.
    pub async fn discard(mut self) {
        self.armed = false;
        remove_quietly(&self.path).await;
    }
}

impl Drop for StagedArtifact {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!(path = ?self.path, "staged file removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(path = ?self.path, error = %e, "failed to remove staged file"),
        }
    }
}

fn staged_path(staging_dir: &Path, extension: Option<&str>) -> PathBuf {
    let mut name = format!("{}{}", STAGED_PREFIX, uuid::Uuid::new_v4().simple());
    if let Some(ext) = extension.filter(|e| !e.is_empty()) {
        name.push('.');
        name.push_str(ext);
    }
    staging_dir.join(name)
}

/// Remove a file, logging failures other than it already being gone
pub(crate) async fn remove_quietly(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = ?path, error = %e, "failed to remove file"),
    }
}
