//! Consistency check between the metadata store and the storage tree

use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use crate::engine::operations::FileStorage;
use crate::engine::results::{ReconciliationReport, SizeMismatch};
use crate::error::StorageError;
use crate::metadata::{FileId, StoredFile};
use crate::storage::filesystem::{create_directory, file_exists, is_temp_upload, move_file};
use crate::storage::operations::scan_files;
use crate::storage::results::DiskEntry;

/// Directory under the root that holds quarantined orphan files
pub const QUARANTINE_DIR: &str = ".quarantine";

/// Unregistered temp uploads younger than this belong to uploads in flight
pub const TEMP_UPLOAD_GRACE: Duration = Duration::from_secs(60 * 60);

const RECORD_PAGE_SIZE: u64 = 500;

impl FileStorage {
    /// Compares every record with the files on disk.
    ///
    /// With `quarantine`, files that have no record are moved under
    /// [`QUARANTINE_DIR`], keeping their path relative to the root. Temp
    /// files of uploads are never moved: recent ones are skipped and those
    /// older than [`TEMP_UPLOAD_GRACE`] are reported as stale.
    ///
    /// Refuses to run over a store that is not durable.
    pub async fn reconcile(&self, quarantine: bool) -> Result<ReconciliationReport, StorageError> {
        if !self.store.is_durable() {
            warn!("Refusing to reconcile against a metadata store that is not durable");
            return Err(StorageError::StoreNotDurable(
                "reconciliation needs the records of a persistent store".into(),
            ));
        }

        info!("Reconciling storage (quarantine: {quarantine})");
        let now = SystemTime::now();

        let records = self.all_records().await?;
        let root = self.sandbox.root();
        let quarantine_root = root.join(QUARANTINE_DIR);
        let disk = scan_files(root, &quarantine_root).await?;

        let mut by_path: HashMap<PathBuf, &StoredFile> = records
            .iter()
            .map(|record| (record.disk_path(), record))
            .collect();

        let mut report = ReconciliationReport::default();
        let mut orphans = Vec::new();

        for entry in disk {
            match by_path.remove(&entry.path) {
                Some(record) if record.size != entry.size => {
                    warn!(
                        "Size mismatch for {}: recorded {} bytes, {} on disk",
                        entry.path.display(),
                        record.size,
                        entry.size
                    );
                    report.size_mismatches.push(SizeMismatch {
                        file: self.to_view(record)?,
                        disk_size: entry.size,
                    });
                }
                Some(_) => {}
                None if is_temp_upload(&entry.path) => {
                    if in_flight(&entry, now) {
                        debug!("Skipping upload in progress: {}", entry.path.display());
                    } else {
                        warn!("Stale upload left behind: {}", entry.path.display());
                        report.stale_uploads.push(self.public_path(&entry.path));
                    }
                }
                None => {
                    warn!("Orphan file without record: {}", entry.path.display());
                    report.orphan_files.push(self.public_path(&entry.path));
                    orphans.push(entry.path);
                }
            }
        }

        // Whatever was not matched on disk has lost its file
        for record in records.iter().filter(|r| by_path.contains_key(&r.disk_path())) {
            warn!(
                "Orphan record {} without file at {}",
                record.id,
                record.disk_path().display()
            );
            report.orphan_records.push(self.to_view(record)?);
        }

        if quarantine {
            for orphan in &orphans {
                match quarantine_file(root, &quarantine_root, orphan).await {
                    Ok(destination) => report.quarantined.push(self.public_path(&destination)),
                    Err(e) => error!("Failed to quarantine {}: {}", orphan.display(), e),
                }
            }
        }

        info!(
            "Reconciliation finished: {} orphan files, {} orphan records, {} size mismatches, {} stale uploads, {} quarantined",
            report.orphan_files.len(),
            report.orphan_records.len(),
            report.size_mismatches.len(),
            report.stale_uploads.len(),
            report.quarantined.len()
        );
        Ok(report)
    }

    async fn all_records(&self) -> Result<Vec<StoredFile>, StorageError> {
        let mut records = Vec::new();
        let mut offset = 0;

        loop {
            let page = self.store.list_all(offset, RECORD_PAGE_SIZE).await?;
            let fetched = page.len() as u64;
            records.extend(page);

            if fetched < RECORD_PAGE_SIZE {
                return Ok(records);
            }
            offset += fetched;
        }
    }
}

/// Whether a temp upload was written to recently enough to still be live
fn in_flight(entry: &DiskEntry, now: SystemTime) -> bool {
    match now.duration_since(entry.modified) {
        Ok(age) => age < TEMP_UPLOAD_GRACE,
        // Modified in the future: clock skew, leave it alone
        Err(_) => true,
    }
}

/// Moves `file` to the same relative location under `quarantine_root`
async fn quarantine_file(
    root: &Path,
    quarantine_root: &Path,
    file: &Path,
) -> std::io::Result<PathBuf> {
    let relative = file
        .strip_prefix(root)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
    let mut destination = quarantine_root.join(relative);

    if file_exists(&destination).await {
        let name = destination
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        destination.set_file_name(format!("{name}.{}", FileId::new()));
    }

    if let Some(parent) = destination.parent() {
        create_directory(parent).await?;
    }
    move_file(file, &destination).await?;

    info!(
        "Quarantined {} -> {}",
        file.display(),
        destination.display()
    );
    Ok(destination)
}
