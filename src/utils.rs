//! Utility functions for file operations and path manipulation

use crate::config::FileCollisionAction;
use crate::error::{Error, Result};
use std::path::{Path, PathBuf};

/// Maximum number of rename attempts when resolving file collisions
const MAX_RENAME_ATTEMPTS: u32 = 9999;

/// Reserve a unique path for a file, handling collisions according to `action`
///
/// For `Rename` and `Skip` the returned path is claimed by creating an empty
/// placeholder with `create_new`, so concurrent callers asking for the same
/// name never receive the same path. The caller replaces the placeholder with
/// the real file. `Overwrite` returns `path` unchanged and creates nothing.
///
/// # Arguments
///
/// * `path` - The desired file path
/// * `action` - How to handle file collisions
///
/// # Errors
///
/// Returns [`Error::FileCollision`] if the file exists and the action is
/// `Skip`, or if no free numbered name was found for `Rename`.
///
/// # Examples
///
/// ```no_run
/// use media_dl::utils::reserve_unique_path;
/// use media_dl::config::FileCollisionAction;
/// use std::path::Path;
///
/// # async fn example() -> media_dl::Result<()> {
/// let path = Path::new("/tmp/movie.mp4");
/// let unique = reserve_unique_path(path, FileCollisionAction::Rename).await?;
/// // If /tmp/movie.mp4 exists, /tmp/movie (1).mp4 is created and returned
/// # Ok(())
/// # }
/// ```
pub async fn reserve_unique_path(path: &Path, action: FileCollisionAction) -> Result<PathBuf> {
    match action {
        FileCollisionAction::Overwrite => Ok(path.to_path_buf()),
        FileCollisionAction::Skip => {
            if create_placeholder(path).await? {
                return Ok(path.to_path_buf());
            }
            Err(Error::FileCollision {
                path: path.to_path_buf(),
                reason: "File already exists and collision action is Skip".to_string(),
            })
        }
        FileCollisionAction::Rename => {
            if create_placeholder(path).await? {
                return Ok(path.to_path_buf());
            }

            let stem = path
                .file_stem()
                .and_then(|s| s.to_str())
                .ok_or_else(|| Error::InvalidPath {
                    path: path.to_path_buf(),
                    reason: "Cannot extract file stem".to_string(),
                })?;

            let extension = path.extension().and_then(|e| e.to_str());

            let parent = path.parent().ok_or_else(|| Error::InvalidPath {
                path: path.to_path_buf(),
                reason: "Cannot extract parent directory".to_string(),
            })?;

            for i in 1..=MAX_RENAME_ATTEMPTS {
                let new_name = match extension {
                    Some(ext) => format!("{} ({}).{}", stem, i, ext),
                    None => format!("{} ({})", stem, i),
                };
                let new_path = parent.join(new_name);
                if create_placeholder(&new_path).await? {
                    return Ok(new_path);
                }
            }

            Err(Error::FileCollision {
                path: path.to_path_buf(),
                reason: format!(
                    "Could not find unique filename after {} attempts",
                    MAX_RENAME_ATTEMPTS
                ),
            })
        }
    }
}

/// Create an empty file at `path`; `false` if something already exists there
async fn create_placeholder(path: &Path) -> Result<bool> {
    match tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await
    {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Move a file, falling back to copy-then-delete across filesystems
///
/// The source never survives a successful call. If the fallback copy fails,
/// any partial destination is removed and the source is left untouched.
pub async fn move_file(source: &Path, destination: &Path) -> Result<()> {
    use tokio::fs;

    match fs::rename(source, destination).await {
        Ok(()) => Ok(()),
        Err(rename_err) => {
            // EXDEV has no stable ErrorKind; any rename failure with an existing
            // source gets one copy attempt.
            if fs::metadata(source).await.is_err() {
                return Err(move_failed(source, destination, rename_err));
            }

            tracing::debug!(
                ?source,
                ?destination,
                error = %rename_err,
                "rename failed, falling back to copy"
            );

            if let Err(copy_err) = fs::copy(source, destination).await {
                let _ = fs::remove_file(destination).await;
                return Err(move_failed(source, destination, copy_err));
            }

            fs::remove_file(source)
                .await
                .map_err(|e| move_failed(source, destination, e))
        }
    }
}

fn move_failed(source: &Path, destination: &Path, e: std::io::Error) -> Error {
    Error::MoveFailed {
        source_path: source.to_path_buf(),
        dest_path: destination.to_path_buf(),
        reason: e.to_string(),
    }
}

/// Replace characters that are unsafe in file names
///
/// Keeps the name recognisable while stripping path separators and control
/// characters that would let a remote-supplied name escape its directory.
#[must_use]
pub fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    let trimmed = cleaned.trim_matches(|c: char| c == '.' || c.is_whitespace());
    if trimmed.is_empty() {
        "download".to_string()
    } else {
        trimmed.to_string()
    }
}
