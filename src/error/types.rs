//! Error types
//!
//! Defines domain-specific error types for each layer of the file store and
//! the engine-level [`StorageError`] they fold into.

use std::io;
use thiserror::Error;

/// Path sandbox errors
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("Path is not safe: {0}")]
    PathUnsafe(String),

    #[error("Invalid file name: {0}")]
    InvalidName(String),

    #[error("Invalid storage root {path}: {source}")]
    InvalidRoot {
        path: String,
        #[source]
        source: io::Error,
    },
}

/// Transfer module errors
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("Upload failed: {0}")]
    UploadFailed(#[source] io::Error),

    #[error("Upload exceeds the maximum file size of {limit} bytes")]
    FileTooLarge { limit: u64 },

    #[error("Download failed: {0}")]
    DownloadFailed(#[source] io::Error),
}

/// Metadata store errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A record already occupies the requested (name, extension, directory)
    #[error("Record conflict: {0}")]
    Conflict(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    /// Store unreachable; retried by the caller's retry policy
    #[error("Store connection failed: {0}")]
    Connection(String),

    #[error("Store query failed: {0}")]
    Database(String),
}

/// Engine-level error returned by every public file store operation
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Path is not safe: {0}")]
    PathUnsafe(String),

    #[error("Invalid file name: {0}")]
    InvalidName(String),

    #[error("Invalid storage root: {0}")]
    InvalidRoot(String),

    #[error("File does not exist: {0}")]
    FileNotExists(String),

    #[error("File already exists: {0}")]
    FileAlreadyExists(String),

    #[error("Error while uploading file to storage: {0}")]
    FileUploadingError(String),

    #[error("File is too large (limit {0} bytes)")]
    FileTooLarge(u64),

    #[error("Error while moving file: {0}")]
    FileMoveError(String),

    #[error("Error while downloading file from storage: {0}")]
    FileDownloadingError(String),

    #[error("Error while deleting file: {0}")]
    FileDeletingError(String),

    #[error("Storage scan failed: {0}")]
    ScanError(String),

    #[error("Metadata store is not durable: {0}")]
    StoreNotDurable(String),

    #[error("Metadata store unavailable: {0}")]
    ConnectionError(String),

    #[error("Metadata store error: {0}")]
    DatabaseError(String),
}

impl From<SandboxError> for StorageError {
    fn from(error: SandboxError) -> Self {
        match error {
            SandboxError::PathUnsafe(p) => StorageError::PathUnsafe(p),
            SandboxError::InvalidName(n) => StorageError::InvalidName(n),
            SandboxError::InvalidRoot { path, source } => {
                StorageError::InvalidRoot(format!("{path}: {source}"))
            }
        }
    }
}

impl From<TransferError> for StorageError {
    fn from(error: TransferError) -> Self {
        match error {
            TransferError::UploadFailed(e) => StorageError::FileUploadingError(e.to_string()),
            TransferError::FileTooLarge { limit } => StorageError::FileTooLarge(limit),
            TransferError::DownloadFailed(e) => StorageError::FileDownloadingError(e.to_string()),
        }
    }
}

impl From<StoreError> for StorageError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::Conflict(msg) => StorageError::FileAlreadyExists(msg),
            StoreError::NotFound(msg) => StorageError::FileNotExists(msg),
            StoreError::Connection(msg) => StorageError::ConnectionError(msg),
            StoreError::Database(msg) => StorageError::DatabaseError(msg),
        }
    }
}
