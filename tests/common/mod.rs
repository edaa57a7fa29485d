#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use rax_file_store::error::StoreError;
use rax_file_store::metadata::{
    FileChanges, FileId, InMemoryMetadataStore, MetadataStore, MetadataTransaction, RetryPolicy,
    StoredFile,
};

/// Switches that make a [`ScriptedStore`] fail on demand
#[derive(Debug, Default)]
pub struct Faults {
    fail_commit: AtomicBool,
    failing_reads: AtomicU32,
}

impl Faults {
    /// Every following commit rolls back and reports a lost connection
    pub fn fail_commits(&self, fail: bool) {
        self.fail_commit.store(fail, Ordering::SeqCst);
    }

    /// The next `count` reads report a lost connection
    pub fn fail_reads(&self, count: u32) {
        self.failing_reads.store(count, Ordering::SeqCst);
    }

    fn check_read(&self) -> Result<(), StoreError> {
        let remaining = self
            .failing_reads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match remaining {
            Ok(_) => Err(StoreError::Connection("connection reset".into())),
            Err(_) => Ok(()),
        }
    }
}

/// Durable stand-in over the in-memory store.
///
/// Reads go through a [`RetryPolicy`] the way the database store's do.
pub struct ScriptedStore {
    inner: InMemoryMetadataStore,
    faults: Arc<Faults>,
    retry: RetryPolicy,
}

impl ScriptedStore {
    pub fn new(inner: InMemoryMetadataStore) -> Self {
        Self {
            inner,
            faults: Arc::new(Faults::default()),
            retry: RetryPolicy::new(3, Duration::from_millis(1)),
        }
    }

    pub fn faults(&self) -> Arc<Faults> {
        Arc::clone(&self.faults)
    }
}

#[async_trait]
impl MetadataStore for ScriptedStore {
    async fn get_by_id(&self, id: FileId) -> Result<Option<StoredFile>, StoreError> {
        self.retry
            .run("get_by_id", move || async move {
                self.faults.check_read()?;
                self.inner.get_by_id(id).await
            })
            .await
    }

    async fn get_by_path(
        &self,
        name: &str,
        extension: &str,
        directory: &str,
    ) -> Result<Option<StoredFile>, StoreError> {
        self.retry
            .run("get_by_path", move || async move {
                self.faults.check_read()?;
                self.inner.get_by_path(name, extension, directory).await
            })
            .await
    }

    async fn list_by_directory(&self, directory: &str) -> Result<Vec<StoredFile>, StoreError> {
        self.retry
            .run("list_by_directory", move || async move {
                self.faults.check_read()?;
                self.inner.list_by_directory(directory).await
            })
            .await
    }

    async fn list_all(&self, offset: u64, limit: u64) -> Result<Vec<StoredFile>, StoreError> {
        self.retry
            .run("list_all", move || async move {
                self.faults.check_read()?;
                self.inner.list_all(offset, limit).await
            })
            .await
    }

    async fn begin(&self) -> Result<Box<dyn MetadataTransaction>, StoreError> {
        Ok(Box::new(ScriptedTransaction {
            inner: self.inner.begin().await?,
            faults: Arc::clone(&self.faults),
        }))
    }
}

struct ScriptedTransaction {
    inner: Box<dyn MetadataTransaction>,
    faults: Arc<Faults>,
}

#[async_trait]
impl MetadataTransaction for ScriptedTransaction {
    async fn insert(&mut self, file: &StoredFile) -> Result<(), StoreError> {
        self.inner.insert(file).await
    }

    async fn update_fields(
        &mut self,
        id: FileId,
        changes: &FileChanges,
    ) -> Result<StoredFile, StoreError> {
        self.inner.update_fields(id, changes).await
    }

    async fn delete_by_id(&mut self, id: FileId) -> Result<Option<StoredFile>, StoreError> {
        self.inner.delete_by_id(id).await
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let ScriptedTransaction { inner, faults } = *self;
        if faults.fail_commit.load(Ordering::SeqCst) {
            inner.rollback().await?;
            return Err(StoreError::Connection("connection lost during commit".into()));
        }
        inner.commit().await
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.inner.rollback().await
    }
}
