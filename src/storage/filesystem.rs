//! File system operations
//!
//! Async disk primitives used by the engine. None of these retry: a failed
//! disk step is terminal for the operation that issued it.

use log::{debug, warn};
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use uuid::Uuid;

/// Suffix of in-flight upload files
pub const TEMP_UPLOAD_SUFFIX: &str = ".tmp";

/// Create a directory and all of its parents
pub async fn create_directory(path: &Path) -> io::Result<()> {
    fs::create_dir_all(path).await
}

/// Check if a regular file exists
pub async fn file_exists(path: &Path) -> bool {
    fs::metadata(path)
        .await
        .map(|meta| meta.is_file())
        .unwrap_or(false)
}

/// Length of a regular file, `None` if there is none at `path`
pub async fn file_size(path: &Path) -> Option<u64> {
    match fs::metadata(path).await {
        Ok(meta) if meta.is_file() => Some(meta.len()),
        _ => None,
    }
}

/// Hidden sibling path an upload streams into before it is published.
///
/// The name does not embed the target's, so it fits wherever the target does.
pub fn temp_upload_path(target: &Path) -> PathBuf {
    target.with_file_name(format!(".{}{}", Uuid::now_v7().simple(), TEMP_UPLOAD_SUFFIX))
}

/// Whether a path looks like an unfinished upload
pub fn is_temp_upload(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('.') && n.ends_with(TEMP_UPLOAD_SUFFIX))
}

/// Move a file, falling back to copy + remove across devices
pub async fn move_file(from: &Path, to: &Path) -> io::Result<()> {
    match fs::rename(from, to).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::CrossesDevices => {
            debug!(
                "Rename {} -> {} crosses devices, copying",
                from.display(),
                to.display()
            );
            fs::copy(from, to).await?;
            fs::remove_file(from).await
        }
        Err(e) => Err(e),
    }
}

/// Remove a file, reporting whether it existed
pub async fn remove_file(path: &Path) -> io::Result<bool> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Best-effort removal of a file the caller has already given up on
pub async fn discard(path: &Path) {
    if let Err(e) = remove_file(path).await {
        warn!("Failed to discard {}: {}", path.display(), e);
    }
}
