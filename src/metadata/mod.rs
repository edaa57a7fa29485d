//! # Metadata store
//!
//! Persistence contract for file records, keyed by [`FileId`], with the
//! uniqueness of `(name, extension, directory)` enforced by the store itself.
//!
//! | Implementation | Use |
//! |----------------|-----|
//! | [`InMemoryMetadataStore`] | development and tests |
//! | [`PostgresMetadataStore`] | production, `files` table via sqlx |
//!
//! Writes go through a [`MetadataTransaction`] so the engine can hold a
//! record's slot while it performs the matching disk step, and roll back if
//! that step fails. Implementations may serialize writers: never read from
//! the store while holding one of its transactions.

pub mod memory;
pub mod postgres;
pub mod retry;
pub mod types;

use async_trait::async_trait;

use crate::error::StoreError;

pub use memory::InMemoryMetadataStore;
pub use postgres::PostgresMetadataStore;
pub use retry::RetryPolicy;
pub use types::{FileChanges, FileId, StoredFile};

/// Record store shared by every request
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Find a record by identifier
    async fn get_by_id(&self, id: FileId) -> Result<Option<StoredFile>, StoreError>;

    /// Find the record occupying a logical location
    async fn get_by_path(
        &self,
        name: &str,
        extension: &str,
        directory: &str,
    ) -> Result<Option<StoredFile>, StoreError>;

    /// Records directly inside `directory`, in identifier order
    async fn list_by_directory(&self, directory: &str) -> Result<Vec<StoredFile>, StoreError>;

    /// One page of all records, in identifier order
    async fn list_all(&self, offset: u64, limit: u64) -> Result<Vec<StoredFile>, StoreError>;

    /// Open a write transaction
    async fn begin(&self) -> Result<Box<dyn MetadataTransaction>, StoreError>;

    /// Whether records outlive the process.
    ///
    /// A store that starts empty on every run cannot tell an orphan file
    /// from a registered one, so reconciliation refuses to act on it.
    fn is_durable(&self) -> bool {
        true
    }

    /// Insert a record in its own transaction
    async fn insert(&self, file: &StoredFile) -> Result<(), StoreError> {
        let mut tx = self.begin().await?;
        tx.insert(file).await?;
        tx.commit().await
    }

    /// Merge changes into a record in its own transaction
    async fn update_fields(
        &self,
        id: FileId,
        changes: &FileChanges,
    ) -> Result<StoredFile, StoreError> {
        let mut tx = self.begin().await?;
        let updated = tx.update_fields(id, changes).await?;
        tx.commit().await?;
        Ok(updated)
    }

    /// Delete a record in its own transaction, returning it if it existed
    async fn delete_by_id(&self, id: FileId) -> Result<Option<StoredFile>, StoreError> {
        let mut tx = self.begin().await?;
        let deleted = tx.delete_by_id(id).await?;
        tx.commit().await?;
        Ok(deleted)
    }
}

/// Write transaction scoped to one engine operation.
///
/// Dropping a transaction without committing rolls it back.
#[async_trait]
pub trait MetadataTransaction: Send {
    /// Insert a new record; `Conflict` if its id or location is taken
    async fn insert(&mut self, file: &StoredFile) -> Result<(), StoreError>;

    /// Merge `changes` into a record and refresh `updated_at`.
    ///
    /// `NotFound` for an unknown id, `Conflict` if the new location is taken.
    async fn update_fields(
        &mut self,
        id: FileId,
        changes: &FileChanges,
    ) -> Result<StoredFile, StoreError>;

    /// Remove a record, returning it if it existed
    async fn delete_by_id(&mut self, id: FileId) -> Result<Option<StoredFile>, StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}
