//! In-memory metadata store
//!
//! Keeps records in a `BTreeMap` ordered by identifier. A transaction holds
//! the map's write lock until it commits or rolls back, which serializes
//! writers the same way a unique index does in the database store.

use async_trait::async_trait;
use chrono::Utc;
use log::debug;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{OwnedRwLockWriteGuard, RwLock};

use crate::error::StoreError;
use crate::metadata::{FileChanges, FileId, MetadataStore, MetadataTransaction, StoredFile};

type Table = BTreeMap<FileId, StoredFile>;

#[derive(Debug, Clone, Default)]
pub struct InMemoryMetadataStore {
    files: Arc<RwLock<Table>>,
}

impl InMemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records
    pub async fn len(&self) -> usize {
        self.files.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.files.read().await.is_empty()
    }
}

fn location_taken(table: &Table, candidate: &StoredFile) -> bool {
    table.values().any(|existing| {
        existing.id != candidate.id
            && existing.occupies(&candidate.name, &candidate.extension, &candidate.directory)
    })
}

fn describe(file: &StoredFile) -> String {
    format!("{}/{}", file.directory, file.file_name())
}

#[async_trait]
impl MetadataStore for InMemoryMetadataStore {
    async fn get_by_id(&self, id: FileId) -> Result<Option<StoredFile>, StoreError> {
        Ok(self.files.read().await.get(&id).cloned())
    }

    async fn get_by_path(
        &self,
        name: &str,
        extension: &str,
        directory: &str,
    ) -> Result<Option<StoredFile>, StoreError> {
        Ok(self
            .files
            .read()
            .await
            .values()
            .find(|file| file.occupies(name, extension, directory))
            .cloned())
    }

    async fn list_by_directory(&self, directory: &str) -> Result<Vec<StoredFile>, StoreError> {
        Ok(self
            .files
            .read()
            .await
            .values()
            .filter(|file| file.directory == directory)
            .cloned()
            .collect())
    }

    async fn list_all(&self, offset: u64, limit: u64) -> Result<Vec<StoredFile>, StoreError> {
        let offset = usize::try_from(offset).unwrap_or(usize::MAX);
        let limit = usize::try_from(limit).unwrap_or(usize::MAX);

        Ok(self
            .files
            .read()
            .await
            .values()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn begin(&self) -> Result<Box<dyn MetadataTransaction>, StoreError> {
        let guard = Arc::clone(&self.files).write_owned().await;
        Ok(Box::new(InMemoryTransaction {
            table: guard,
            undo: Vec::new(),
        }))
    }

    fn is_durable(&self) -> bool {
        false
    }
}

enum Undo {
    Remove(FileId),
    Restore(StoredFile),
}

/// Exclusive view of the table plus the log needed to revert it
struct InMemoryTransaction {
    table: OwnedRwLockWriteGuard<Table>,
    undo: Vec<Undo>,
}

impl InMemoryTransaction {
    fn revert(&mut self) {
        while let Some(step) = self.undo.pop() {
            match step {
                Undo::Remove(id) => {
                    self.table.remove(&id);
                }
                Undo::Restore(file) => {
                    self.table.insert(file.id, file);
                }
            }
        }
    }
}

impl Drop for InMemoryTransaction {
    fn drop(&mut self) {
        if !self.undo.is_empty() {
            debug!("Rolling back uncommitted metadata transaction");
            self.revert();
        }
    }
}

#[async_trait]
impl MetadataTransaction for InMemoryTransaction {
    async fn insert(&mut self, file: &StoredFile) -> Result<(), StoreError> {
        if self.table.contains_key(&file.id) {
            return Err(StoreError::Conflict(format!("id {} already exists", file.id)));
        }
        if location_taken(&self.table, file) {
            return Err(StoreError::Conflict(describe(file)));
        }

        self.table.insert(file.id, file.clone());
        self.undo.push(Undo::Remove(file.id));
        Ok(())
    }

    async fn update_fields(
        &mut self,
        id: FileId,
        changes: &FileChanges,
    ) -> Result<StoredFile, StoreError> {
        let original = self
            .table
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        let mut updated = original.clone();
        changes.apply(&mut updated, Utc::now());

        if changes.relocates() && location_taken(&self.table, &updated) {
            return Err(StoreError::Conflict(describe(&updated)));
        }

        self.table.insert(id, updated.clone());
        self.undo.push(Undo::Restore(original));
        Ok(updated)
    }

    async fn delete_by_id(&mut self, id: FileId) -> Result<Option<StoredFile>, StoreError> {
        let removed = self.table.remove(&id);
        if let Some(file) = &removed {
            self.undo.push(Undo::Restore(file.clone()));
        }
        Ok(removed)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let mut tx = self;
        tx.undo.clear();
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        let mut tx = self;
        tx.revert();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str, directory: &str) -> StoredFile {
        StoredFile::new(name, ".txt", directory, 1, None)
    }

    #[tokio::test]
    async fn test_insert_and_lookup() {
        let store = InMemoryMetadataStore::new();
        let file = record("a", "/root");
        store.insert(&file).await.unwrap();

        assert_eq!(store.get_by_id(file.id).await.unwrap(), Some(file.clone()));
        assert_eq!(
            store.get_by_path("a", ".txt", "/root").await.unwrap(),
            Some(file)
        );
        assert_eq!(store.get_by_path("a", ".md", "/root").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_duplicate_location_conflicts() {
        let store = InMemoryMetadataStore::new();
        store.insert(&record("a", "/root")).await.unwrap();

        let err = store.insert(&record("a", "/root")).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        assert_eq!(store.len().await, 1);

        store.insert(&record("a", "/root/other")).await.unwrap();
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn test_update_merges_and_detects_conflicts() {
        let store = InMemoryMetadataStore::new();
        let a = StoredFile::new("a", ".txt", "/root", 1, Some("note".into()));
        let b = record("b", "/root");
        store.insert(&a).await.unwrap();
        store.insert(&b).await.unwrap();

        let renamed = store
            .update_fields(
                a.id,
                &FileChanges {
                    name: Some("c".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(renamed.name, "c");
        assert_eq!(renamed.comment.as_deref(), Some("note"));
        assert!(renamed.updated_at >= a.updated_at);

        let err = store
            .update_fields(
                a.id,
                &FileChanges {
                    name: Some("b".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        let missing = store
            .update_fields(FileId::new(), &FileChanges::default())
            .await
            .unwrap_err();
        assert!(matches!(missing, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_dropped_transaction_rolls_back() {
        let store = InMemoryMetadataStore::new();
        let kept = record("kept", "/root");
        store.insert(&kept).await.unwrap();

        {
            let mut tx = store.begin().await.unwrap();
            tx.insert(&record("new", "/root")).await.unwrap();
            tx.delete_by_id(kept.id).await.unwrap();
        }

        assert_eq!(store.len().await, 1);
        assert_eq!(store.get_by_id(kept.id).await.unwrap(), Some(kept));
    }

    #[tokio::test]
    async fn test_explicit_rollback_restores_updates() {
        let store = InMemoryMetadataStore::new();
        let file = record("a", "/root");
        store.insert(&file).await.unwrap();

        let mut tx = store.begin().await.unwrap();
        tx.update_fields(
            file.id,
            &FileChanges {
                directory: Some("/root/moved".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        tx.rollback().await.unwrap();

        assert_eq!(store.get_by_id(file.id).await.unwrap(), Some(file));
    }

    #[tokio::test]
    async fn test_list_all_pages_in_id_order() {
        let store = InMemoryMetadataStore::new();
        for i in 0..15 {
            store.insert(&record(&format!("f{i}"), "/root")).await.unwrap();
        }

        let first = store.list_all(0, 10).await.unwrap();
        let second = store.list_all(10, 10).await.unwrap();
        assert_eq!(first.len(), 10);
        assert_eq!(second.len(), 5);

        let ids: Vec<FileId> = first.iter().chain(&second).map(|f| f.id).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(ids, sorted);
    }

    #[test]
    fn test_store_is_not_durable() {
        assert!(!InMemoryMetadataStore::new().is_durable());
    }

    #[tokio::test]
    async fn test_list_by_directory() {
        let store = InMemoryMetadataStore::new();
        store.insert(&record("a", "/root/docs")).await.unwrap();
        store.insert(&record("b", "/root/docs")).await.unwrap();
        store.insert(&record("c", "/root/docs/nested")).await.unwrap();

        let listed = store.list_by_directory("/root/docs").await.unwrap();
        assert_eq!(listed.len(), 2);
        assert!(listed.iter().all(|f| f.directory == "/root/docs"));
    }
}
