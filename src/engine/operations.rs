//! File store operations
//!
//! Every operation that touches both the disk and the metadata store orders
//! its steps so a failure leaves no committed record without its file and
//! never overwrites a file another request owns:
//!
//! 1. the upload streams into a hidden temp file next to the target
//! 2. the record's location is claimed inside a store transaction
//! 3. the file is published (renamed or moved) into place
//! 4. the transaction commits, or the disk step is undone
//!
//! Delete runs the other way round: the record goes first, then the file.

use futures::{StreamExt, TryStreamExt};
use log::{error, info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::AsyncRead;

use crate::config::{FileConfig, StoreConfig};
use crate::engine::results::{FileDownload, FileUpdate, PublicFileView};
use crate::error::{StorageError, StoreError};
use crate::metadata::{FileChanges, FileId, MetadataStore, MetadataTransaction, StoredFile};
use crate::storage::filesystem::{
    create_directory, discard, file_exists, file_size, move_file, remove_file, temp_upload_path,
};
use crate::storage::validation::path_to_str;
use crate::storage::{PathSandbox, split_file_name, validate_file_name};
use crate::transfer::{download, upload};

/// Default page size for paginated listings
pub const DEFAULT_PAGE_LIMIT: u64 = 10;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Sandboxed file storage keeping the disk tree and the metadata store in step
pub struct FileStorage {
    pub(super) sandbox: PathSandbox,
    pub(super) store: Arc<dyn MetadataStore>,
    chunk_size: usize,
    max_file_size: Option<u64>,
}

impl FileStorage {
    pub fn new(sandbox: PathSandbox, store: Arc<dyn MetadataStore>, file: &FileConfig) -> Self {
        Self {
            sandbox,
            store,
            chunk_size: file.upload_chunk_size.max(1),
            max_file_size: Some(file.max_file_size_bytes()),
        }
    }

    /// Builds the engine over the configured storage root, creating it if needed
    pub async fn from_config(
        config: &StoreConfig,
        store: Arc<dyn MetadataStore>,
    ) -> Result<Self, StorageError> {
        let root = config.storage_root();
        create_directory(&root).await.map_err(|e| {
            error!("Failed to create storage root {}: {}", root.display(), e);
            StorageError::InvalidRoot(format!("{}: {}", root.display(), e))
        })?;

        let sandbox = PathSandbox::new(&root)?;
        info!("File storage rooted at {}", sandbox.root().display());
        Ok(Self::new(sandbox, store, &config.file))
    }

    pub fn sandbox(&self) -> &PathSandbox {
        &self.sandbox
    }

    /// Stores `source` as `filename` inside `directory_path`
    pub async fn add<R>(
        &self,
        directory_path: &str,
        filename: &str,
        source: &mut R,
    ) -> Result<PublicFileView, StorageError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        self.add_with_comment(directory_path, filename, None, source)
            .await
    }

    pub async fn add_with_comment<R>(
        &self,
        directory_path: &str,
        filename: &str,
        comment: Option<String>,
        source: &mut R,
    ) -> Result<PublicFileView, StorageError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        info!("Adding file {filename} to {directory_path}");

        let (name, extension) = split_file_name(filename)?;
        let directory = self.sandbox.resolve(directory_path).await?;
        let target = self.sandbox.resolve_file(&directory, filename).await?;
        let directory_str = path_to_str(&directory)?;

        if self
            .store
            .get_by_path(&name, &extension, &directory_str)
            .await?
            .is_some()
        {
            warn!("File already registered: {}", target.display());
            return Err(StorageError::FileAlreadyExists(self.public_path(&target)));
        }

        create_directory(&directory).await.map_err(|e| {
            error!("Failed to create directory {}: {}", directory.display(), e);
            StorageError::FileUploadingError(e.to_string())
        })?;

        let temp = temp_upload_path(&target);
        let size = match self.write_temp(&temp, source).await {
            Ok(size) => size,
            Err(e) => {
                discard(&temp).await;
                return Err(e);
            }
        };

        let record = StoredFile::new(name, extension, directory_str, size, comment);
        if let Err(e) = self.publish_upload(&record, &temp, &target).await {
            discard(&temp).await;
            return Err(e);
        }

        info!(
            "File added: {} ({} bytes, id {})",
            target.display(),
            size,
            record.id
        );
        self.to_view(&record)
    }

    /// Streams `source` into `temp` and syncs it, returning the byte count
    async fn write_temp<R>(&self, temp: &Path, source: &mut R) -> Result<u64, StorageError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let mut file = File::create(temp).await.map_err(|e| {
            error!("Failed to create {}: {}", temp.display(), e);
            StorageError::FileUploadingError(e.to_string())
        })?;

        let result = upload(&mut file, source, self.chunk_size, self.max_file_size).await?;

        file.sync_all().await.map_err(|e| {
            error!("Failed to sync {}: {}", temp.display(), e);
            StorageError::FileUploadingError(e.to_string())
        })?;

        Ok(result.bytes)
    }

    /// Claims the record's slot, renames the temp file into place and commits
    async fn publish_upload(
        &self,
        record: &StoredFile,
        temp: &Path,
        target: &Path,
    ) -> Result<(), StorageError> {
        let mut tx = self.store.begin().await?;

        if let Err(e) = tx.insert(record).await {
            warn!("Could not claim {}: {}", target.display(), e);
            abandon(tx).await;
            return Err(match e {
                StoreError::Conflict(_) => {
                    StorageError::FileAlreadyExists(self.public_path(target))
                }
                other => other.into(),
            });
        }

        if file_exists(target).await {
            warn!(
                "Unregistered file already occupies {}, refusing to overwrite",
                target.display()
            );
            abandon(tx).await;
            return Err(StorageError::FileAlreadyExists(self.public_path(target)));
        }

        if let Err(e) = move_file(temp, target).await {
            error!(
                "Failed to publish {} to {}: {}",
                temp.display(),
                target.display(),
                e
            );
            abandon(tx).await;
            return Err(StorageError::FileUploadingError(e.to_string()));
        }

        if let Err(e) = tx.commit().await {
            error!("Commit failed for {}, removing file: {}", target.display(), e);
            discard(target).await;
            return Err(e.into());
        }

        Ok(())
    }

    /// Renames, moves or re-comments a stored file
    pub async fn update(
        &self,
        id: FileId,
        changes: FileUpdate,
    ) -> Result<PublicFileView, StorageError> {
        info!("Updating file {id}");

        let current = self.require_record(id).await?;
        let current_path = current.disk_path();
        if !file_exists(&current_path).await {
            warn!(
                "Record {} has no file on disk at {}",
                id,
                current_path.display()
            );
            return Err(StorageError::FileNotExists(id.to_string()));
        }

        if !changes.relocates() {
            let updated = self
                .store
                .update_fields(
                    id,
                    &FileChanges {
                        comment: changes.comment,
                        ..Default::default()
                    },
                )
                .await?;
            info!("File {id} updated in place");
            return self.to_view(&updated);
        }

        let new_name = changes.name.unwrap_or_else(|| current.name.clone());
        validate_file_name(&new_name)?;
        let file_name = format!("{}{}", new_name, current.extension);

        let directory = match &changes.new_dir_path {
            Some(dir) => self.sandbox.resolve(dir).await?,
            None => PathBuf::from(&current.directory),
        };
        let target = self.sandbox.resolve_file(&directory, &file_name).await?;
        let directory_str = path_to_str(&directory)?;

        let file_changes = FileChanges {
            name: Some(new_name.clone()),
            directory: Some(directory_str.clone()),
            comment: changes.comment,
        };

        if target == current_path {
            let updated = self.store.update_fields(id, &file_changes).await?;
            info!("File {id} updated, location unchanged");
            return self.to_view(&updated);
        }

        let occupant = self
            .store
            .get_by_path(&new_name, &current.extension, &directory_str)
            .await?;
        if occupant.is_some_and(|other| other.id != id) || file_exists(&target).await {
            warn!("Cannot move {id}: {} is taken", target.display());
            return Err(StorageError::FileAlreadyExists(self.public_path(&target)));
        }

        let updated = self
            .relocate(id, &file_changes, &current_path, &directory, &target)
            .await?;

        info!(
            "File {} moved {} -> {}",
            id,
            current_path.display(),
            target.display()
        );
        self.to_view(&updated)
    }

    async fn relocate(
        &self,
        id: FileId,
        changes: &FileChanges,
        from: &Path,
        directory: &Path,
        to: &Path,
    ) -> Result<StoredFile, StorageError> {
        let mut tx = self.store.begin().await?;

        let updated = match tx.update_fields(id, changes).await {
            Ok(updated) => updated,
            Err(e) => {
                abandon(tx).await;
                return Err(match e {
                    StoreError::Conflict(_) => {
                        StorageError::FileAlreadyExists(self.public_path(to))
                    }
                    other => other.into(),
                });
            }
        };

        if let Err(e) = create_directory(directory).await {
            error!("Failed to create directory {}: {}", directory.display(), e);
            abandon(tx).await;
            return Err(StorageError::FileMoveError(e.to_string()));
        }

        if let Err(e) = move_file(from, to).await {
            error!(
                "Failed to move {} to {}: {}",
                from.display(),
                to.display(),
                e
            );
            abandon(tx).await;
            return Err(StorageError::FileMoveError(e.to_string()));
        }

        if let Err(e) = tx.commit().await {
            error!("Commit failed after moving {}, moving it back: {}", id, e);
            if let Err(undo) = move_file(to, from).await {
                error!(
                    "Failed to move {} back to {}: {}",
                    to.display(),
                    from.display(),
                    undo
                );
            }
            return Err(e.into());
        }

        Ok(updated)
    }

    /// Opens a lazy download stream for a stored file.
    ///
    /// The file must still have the size its record was written with.
    pub async fn get(&self, id: FileId) -> Result<FileDownload, StorageError> {
        let record = self.require_record(id).await?;
        let path = record.disk_path();

        let Some(size) = file_size(&path).await else {
            warn!("Record {} has no file on disk at {}", id, path.display());
            return Err(StorageError::FileNotExists(id.to_string()));
        };
        if size != record.size {
            warn!(
                "Size drift for {}: recorded {} bytes, {} on disk",
                id, record.size, size
            );
            return Err(StorageError::FileDownloadingError(format!(
                "{id}: recorded {} bytes, found {size}",
                record.size
            )));
        }

        info!("Downloading file {} from {}", id, path.display());
        let stream = download(path, self.chunk_size)
            .map_err(StorageError::from)
            .boxed();

        Ok(FileDownload {
            stream,
            filename: record.file_name(),
        })
    }

    /// Removes a stored file, returning the view of the deleted record
    pub async fn delete(&self, id: FileId) -> Result<PublicFileView, StorageError> {
        info!("Deleting file {id}");

        let record = self
            .store
            .delete_by_id(id)
            .await?
            .ok_or_else(|| StorageError::FileNotExists(id.to_string()))?;

        let path = record.disk_path();
        match remove_file(&path).await {
            Ok(true) => info!("File deleted: {}", path.display()),
            Ok(false) => warn!(
                "Record {} removed but {} was already missing",
                id,
                path.display()
            ),
            Err(e) => {
                error!("Failed to delete {}: {}", path.display(), e);
                return Err(StorageError::FileDeletingError(e.to_string()));
            }
        }

        self.to_view(&record)
    }

    pub async fn get_info(&self, id: FileId) -> Result<PublicFileView, StorageError> {
        let record = self.require_record(id).await?;
        self.to_view(&record)
    }

    pub async fn get_info_by_path(&self, file_path: &str) -> Result<PublicFileView, StorageError> {
        let record = self.record_at_path(file_path).await?;
        self.to_view(&record)
    }

    /// [`get`](Self::get) for the file at a path relative to the storage root
    pub async fn get_by_path(&self, file_path: &str) -> Result<FileDownload, StorageError> {
        let record = self.record_at_path(file_path).await?;
        self.get(record.id).await
    }

    pub async fn update_by_path(
        &self,
        file_path: &str,
        changes: FileUpdate,
    ) -> Result<PublicFileView, StorageError> {
        let record = self.record_at_path(file_path).await?;
        self.update(record.id, changes).await
    }

    pub async fn delete_by_path(&self, file_path: &str) -> Result<PublicFileView, StorageError> {
        let record = self.record_at_path(file_path).await?;
        self.delete(record.id).await
    }

    /// Looks a record up by its path relative to the storage root
    async fn record_at_path(&self, file_path: &str) -> Result<StoredFile, StorageError> {
        let resolved = self.sandbox.resolve(file_path).await?;
        let (Some(directory), Some(file_name)) = (resolved.parent(), resolved.file_name()) else {
            return Err(StorageError::InvalidName(file_path.to_string()));
        };
        if resolved == self.sandbox.root() {
            return Err(StorageError::InvalidName(file_path.to_string()));
        }

        let (name, extension) = split_file_name(&file_name.to_string_lossy())?;
        self.store
            .get_by_path(&name, &extension, &path_to_str(directory)?)
            .await?
            .ok_or_else(|| StorageError::FileNotExists(file_path.to_string()))
    }

    /// Files directly inside a directory, in id order
    pub async fn list_directory(
        &self,
        directory_path: &str,
    ) -> Result<Vec<PublicFileView>, StorageError> {
        let directory = self.sandbox.resolve(directory_path).await?;
        let records = self
            .store
            .list_by_directory(&path_to_str(&directory)?)
            .await?;

        records.iter().map(|record| self.to_view(record)).collect()
    }

    /// One page of every stored file, in id order
    pub async fn list_all(
        &self,
        skip: u64,
        limit: u64,
    ) -> Result<Vec<PublicFileView>, StorageError> {
        let records = self.store.list_all(skip, limit).await?;
        records.iter().map(|record| self.to_view(record)).collect()
    }

    /// Directory listing when a prefix is given, a page of all files otherwise
    pub async fn list(
        &self,
        prefix: Option<&str>,
        skip: u64,
        limit: u64,
    ) -> Result<Vec<PublicFileView>, StorageError> {
        match prefix {
            Some(prefix) if !prefix.trim().is_empty() => self.list_directory(prefix).await,
            _ => self.list_all(skip, limit).await,
        }
    }

    async fn require_record(&self, id: FileId) -> Result<StoredFile, StorageError> {
        self.store
            .get_by_id(id)
            .await?
            .ok_or_else(|| StorageError::FileNotExists(id.to_string()))
    }

    pub(super) fn to_view(&self, record: &StoredFile) -> Result<PublicFileView, StorageError> {
        Ok(PublicFileView {
            id: record.id.to_string(),
            name: record.name.clone(),
            extension: record.extension.clone(),
            path: self.sandbox.to_public(Path::new(&record.directory))?,
            size: record.size,
            created_at: record.created_at.format(TIME_FORMAT).to_string(),
            updated_at: record.updated_at.format(TIME_FORMAT).to_string(),
            comment: record.comment.clone(),
        })
    }

    /// Public form of a path for error messages
    pub(super) fn public_path(&self, path: &Path) -> String {
        self.sandbox
            .to_public(path)
            .unwrap_or_else(|_| path.display().to_string())
    }
}

/// Parses a client-supplied id; an unparsable id names no file
pub fn parse_file_id(id: &str) -> Result<FileId, StorageError> {
    id.trim()
        .parse()
        .map_err(|_| StorageError::FileNotExists(id.to_string()))
}

/// Rolls back a transaction whose disk step did not happen
async fn abandon(tx: Box<dyn MetadataTransaction>) {
    if let Err(e) = tx.rollback().await {
        error!("Metadata rollback failed: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::InMemoryMetadataStore;
    use tempfile::TempDir;

    fn storage() -> (TempDir, FileStorage) {
        let dir = TempDir::new().unwrap();
        let sandbox = PathSandbox::new(dir.path()).unwrap();
        let file = FileConfig {
            upload_chunk_size: 64 * 1024,
            max_file_size_mb: 1,
        };
        let storage = FileStorage::new(sandbox, Arc::new(InMemoryMetadataStore::new()), &file);
        (dir, storage)
    }

    #[test]
    fn test_parse_file_id() {
        let id = FileId::new();
        assert_eq!(parse_file_id(&id.to_string()).unwrap(), id);
        assert!(matches!(
            parse_file_id("42"),
            Err(StorageError::FileNotExists(_))
        ));
    }

    #[tokio::test]
    async fn test_add_leaves_no_temp_file() {
        let (_dir, storage) = storage();
        let view = storage
            .add("docs", "notes.txt", &mut &b"hello world"[..])
            .await
            .unwrap();

        assert_eq!(view.path, "/docs");
        assert_eq!(view.size, 11);

        let names: Vec<String> = std::fs::read_dir(storage.sandbox().root().join("docs"))
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["notes.txt".to_string()]);
    }

    #[tokio::test]
    async fn test_oversized_upload_is_discarded() {
        let (_dir, storage) = storage();
        let data = vec![0u8; 1024 * 1024 + 1];

        let err = storage
            .add("/", "big.bin", &mut &data[..])
            .await
            .unwrap_err();

        assert!(matches!(err, StorageError::FileTooLarge(_)));
        assert_eq!(
            std::fs::read_dir(storage.sandbox().root()).unwrap().count(),
            0
        );
    }

    #[tokio::test]
    async fn test_unregistered_file_is_not_overwritten() {
        let (_dir, storage) = storage();
        let stray = storage.sandbox().root().join("stray.txt");
        std::fs::write(&stray, b"keep me").unwrap();

        let err = storage
            .add("/", "stray.txt", &mut &b"new"[..])
            .await
            .unwrap_err();

        assert!(matches!(err, StorageError::FileAlreadyExists(_)));
        assert_eq!(std::fs::read(&stray).unwrap(), b"keep me");
        assert!(storage.list_all(0, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_get_info_by_path() {
        let (_dir, storage) = storage();
        let added = storage
            .add("a/b", "c.tar.gz", &mut &b"x"[..])
            .await
            .unwrap();

        let found = storage.get_info_by_path("/a/b/c.tar.gz").await.unwrap();
        assert_eq!(found, added);
        assert_eq!(found.name, "c.tar");

        assert!(matches!(
            storage.get_info_by_path("a/b/missing.txt").await,
            Err(StorageError::FileNotExists(_))
        ));
        assert!(matches!(
            storage.get_info_by_path("/").await,
            Err(StorageError::InvalidName(_))
        ));
    }

    #[tokio::test]
    async fn test_path_addressed_operations() {
        let (_dir, storage) = storage();
        let added = storage
            .add("docs", "a.txt", &mut &b"content"[..])
            .await
            .unwrap();

        let download = storage.get_by_path("/docs/a.txt").await.unwrap();
        assert_eq!(download.filename, "a.txt");
        let bytes: Vec<bytes::Bytes> = download.stream.try_collect().await.unwrap();
        assert_eq!(bytes.concat(), b"content");

        let renamed = storage
            .update_by_path("docs/a.txt", FileUpdate::default().rename("b"))
            .await
            .unwrap();
        assert_eq!(renamed.id, added.id);
        assert_eq!(renamed.logical_path(), "/docs/b.txt");
        assert!(matches!(
            storage.get_by_path("docs/a.txt").await,
            Err(StorageError::FileNotExists(_))
        ));

        let deleted = storage.delete_by_path("/docs/b.txt").await.unwrap();
        assert_eq!(deleted.id, added.id);
        assert!(!storage.sandbox().root().join("docs/b.txt").exists());
        assert!(matches!(
            storage.delete_by_path("/docs/b.txt").await,
            Err(StorageError::FileNotExists(_))
        ));
        assert!(matches!(
            storage.update_by_path("../docs/b.txt", FileUpdate::default()).await,
            Err(StorageError::PathUnsafe(_))
        ));
    }

    #[tokio::test]
    async fn test_get_refuses_file_with_drifted_size() {
        let (_dir, storage) = storage();
        let added = storage.add("/", "a.txt", &mut &b"abc"[..]).await.unwrap();
        let id = parse_file_id(&added.id).unwrap();
        std::fs::write(storage.sandbox().root().join("a.txt"), b"abcdef").unwrap();

        assert!(matches!(
            storage.get(id).await,
            Err(StorageError::FileDownloadingError(_))
        ));
        assert_eq!(storage.get_info(id).await.unwrap(), added);
    }

    #[tokio::test]
    async fn test_add_accepts_names_up_to_the_fs_limit() {
        let (_dir, storage) = storage();
        let name = format!("{}.txt", "a".repeat(246));

        let view = storage.add("/", &name, &mut &b"x"[..]).await.unwrap();

        assert_eq!(view.logical_path(), format!("/{name}"));
        assert!(storage.sandbox().root().join(&name).is_file());
    }

    #[tokio::test]
    async fn test_rename_keeps_extension() {
        let (_dir, storage) = storage();
        let added = storage
            .add("/", "draft.md", &mut &b"text"[..])
            .await
            .unwrap();
        let id = parse_file_id(&added.id).unwrap();

        let renamed = storage
            .update(id, FileUpdate::default().rename("final"))
            .await
            .unwrap();

        assert_eq!(renamed.logical_path(), "/final.md");
        let root = storage.sandbox().root();
        assert!(root.join("final.md").is_file());
        assert!(!root.join("draft.md").exists());
    }

    #[tokio::test]
    async fn test_move_onto_existing_file_is_refused() {
        let (_dir, storage) = storage();
        let a = storage.add("/", "a.txt", &mut &b"a"[..]).await.unwrap();
        storage.add("/", "b.txt", &mut &b"b"[..]).await.unwrap();
        let id = parse_file_id(&a.id).unwrap();

        let err = storage
            .update(id, FileUpdate::default().rename("b"))
            .await
            .unwrap_err();

        assert!(matches!(err, StorageError::FileAlreadyExists(_)));
        let root = storage.sandbox().root();
        assert_eq!(std::fs::read(root.join("a.txt")).unwrap(), b"a");
        assert_eq!(std::fs::read(root.join("b.txt")).unwrap(), b"b");
    }

    #[tokio::test]
    async fn test_delete_tolerates_missing_disk_file() {
        let (_dir, storage) = storage();
        let added = storage.add("/", "gone.txt", &mut &b"x"[..]).await.unwrap();
        std::fs::remove_file(storage.sandbox().root().join("gone.txt")).unwrap();
        let id = parse_file_id(&added.id).unwrap();

        let deleted = storage.delete(id).await.unwrap();
        assert_eq!(deleted.id, added.id);
        assert!(matches!(
            storage.get_info(id).await,
            Err(StorageError::FileNotExists(_))
        ));
    }

    #[tokio::test]
    async fn test_list_with_prefix() {
        let (_dir, storage) = storage();
        storage.add("docs", "a.txt", &mut &b"a"[..]).await.unwrap();
        storage.add("/", "b.txt", &mut &b"b"[..]).await.unwrap();

        let docs = storage.list(Some("docs"), 0, 10).await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].logical_path(), "/docs/a.txt");

        let all = storage.list(None, 0, DEFAULT_PAGE_LIMIT).await.unwrap();
        assert_eq!(all.len(), 2);
    }
}
