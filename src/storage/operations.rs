//! Storage operations
//!
//! Whole-tree disk scans used by reconciliation.

use log::info;
use std::path::Path;
use walkdir::WalkDir;

use crate::error::StorageError;
use crate::storage::results::DiskEntry;

/// Lists every regular file under `root`, skipping the `excluded` subtree.
///
/// Symlinks are not followed. The walk runs on the blocking pool.
pub async fn scan_files(root: &Path, excluded: &Path) -> Result<Vec<DiskEntry>, StorageError> {
    let root = root.to_path_buf();
    let excluded = excluded.to_path_buf();

    let entries = tokio::task::spawn_blocking(move || walk(&root, &excluded))
        .await
        .map_err(|e| StorageError::ScanError(format!("scan task failed: {e}")))??;

    info!("Scanned storage tree - {} files", entries.len());
    Ok(entries)
}

fn walk(root: &Path, excluded: &Path) -> Result<Vec<DiskEntry>, StorageError> {
    let mut entries = Vec::new();

    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| entry.path() != excluded);

    for entry in walker {
        let entry = entry.map_err(|e| StorageError::ScanError(e.to_string()))?;
        if !entry.file_type().is_file() {
            continue;
        }

        let metadata = entry
            .metadata()
            .map_err(|e| StorageError::ScanError(e.to_string()))?;
        let modified = metadata
            .modified()
            .map_err(|e| StorageError::ScanError(e.to_string()))?;

        entries.push(DiskEntry {
            path: entry.into_path(),
            size: metadata.len(),
            modified,
        });
    }

    Ok(entries)
}
