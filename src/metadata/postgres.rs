//! PostgreSQL metadata store
//!
//! Records live in the `files` table; the `uq_name_extension_directory`
//! constraint is what settles concurrent claims on the same location.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, info};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, Row, Transaction};
use std::time::Duration;
use uuid::Uuid;

use crate::config::DatabaseConfig;
use crate::error::StoreError;
use crate::metadata::{
    FileChanges, FileId, MetadataStore, MetadataTransaction, RetryPolicy, StoredFile,
};

const SCHEMA: &str = include_str!("../../migrations/0001_create_files.sql");

const SELECT_COLUMNS: &str =
    "SELECT id, name, extension, directory, size, created_at, updated_at, comment FROM files";

/// PostgreSQL unique_violation
const UNIQUE_VIOLATION: &str = "23505";

#[derive(Debug, Clone)]
pub struct PostgresMetadataStore {
    pool: PgPool,
    retry: RetryPolicy,
}

impl PostgresMetadataStore {
    /// Connects to the configured database, retrying while it is unreachable
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, StoreError> {
        let retry = RetryPolicy::new(
            config.connect_retries,
            Duration::from_millis(config.retry_backoff_ms),
        );

        let pool = retry
            .run("database connect", || async {
                PgPoolOptions::new()
                    .max_connections(config.max_connections)
                    .connect(&config.url)
                    .await
                    .map_err(map_sqlx_error)
            })
            .await?;

        info!(
            "Connected to metadata database (max {} connections)",
            config.max_connections
        );
        Ok(Self { pool, retry })
    }

    pub fn from_pool(pool: PgPool, retry: RetryPolicy) -> Self {
        Self { pool, retry }
    }

    /// Creates the `files` table and its indexes if they are missing
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        for statement in schema_statements(SCHEMA) {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(map_sqlx_error)?;
        }
        debug!("Metadata schema ensured");
        Ok(())
    }
}

#[async_trait]
impl MetadataStore for PostgresMetadataStore {
    async fn get_by_id(&self, id: FileId) -> Result<Option<StoredFile>, StoreError> {
        let pool = &self.pool;
        let sql = format!("{SELECT_COLUMNS} WHERE id = $1");

        let row = self
            .retry
            .run("get file by id", || async {
                sqlx::query(&sql)
                    .bind(id.0)
                    .fetch_optional(pool)
                    .await
                    .map_err(map_sqlx_error)
            })
            .await?;

        row.as_ref().map(parse_file_row).transpose()
    }

    async fn get_by_path(
        &self,
        name: &str,
        extension: &str,
        directory: &str,
    ) -> Result<Option<StoredFile>, StoreError> {
        let pool = &self.pool;
        let sql =
            format!("{SELECT_COLUMNS} WHERE name = $1 AND extension = $2 AND directory = $3");

        let row = self
            .retry
            .run("get file by path", || async {
                sqlx::query(&sql)
                    .bind(name)
                    .bind(extension)
                    .bind(directory)
                    .fetch_optional(pool)
                    .await
                    .map_err(map_sqlx_error)
            })
            .await?;

        row.as_ref().map(parse_file_row).transpose()
    }

    async fn list_by_directory(&self, directory: &str) -> Result<Vec<StoredFile>, StoreError> {
        let pool = &self.pool;
        let sql = format!("{SELECT_COLUMNS} WHERE directory = $1 ORDER BY id");

        let rows = self
            .retry
            .run("list directory", || async {
                sqlx::query(&sql)
                    .bind(directory)
                    .fetch_all(pool)
                    .await
                    .map_err(map_sqlx_error)
            })
            .await?;

        rows.iter().map(parse_file_row).collect()
    }

    async fn list_all(&self, offset: u64, limit: u64) -> Result<Vec<StoredFile>, StoreError> {
        let pool = &self.pool;
        let sql = format!("{SELECT_COLUMNS} ORDER BY id OFFSET $1 LIMIT $2");
        let offset = i64::try_from(offset).unwrap_or(i64::MAX);
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        let rows = self
            .retry
            .run("list files", || async {
                sqlx::query(&sql)
                    .bind(offset)
                    .bind(limit)
                    .fetch_all(pool)
                    .await
                    .map_err(map_sqlx_error)
            })
            .await?;

        rows.iter().map(parse_file_row).collect()
    }

    async fn begin(&self) -> Result<Box<dyn MetadataTransaction>, StoreError> {
        let pool = &self.pool;
        let tx = self
            .retry
            .run("begin transaction", || async {
                pool.begin().await.map_err(map_sqlx_error)
            })
            .await?;

        Ok(Box::new(PostgresTransaction { tx }))
    }
}

/// Open database transaction; sqlx rolls it back when dropped uncommitted
struct PostgresTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl MetadataTransaction for PostgresTransaction {
    async fn insert(&mut self, file: &StoredFile) -> Result<(), StoreError> {
        let size = size_to_db(file.size)?;

        sqlx::query(
            "INSERT INTO files (id, name, extension, directory, size, created_at, updated_at, comment) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(file.id.0)
        .bind(&file.name)
        .bind(&file.extension)
        .bind(&file.directory)
        .bind(size)
        .bind(file.created_at)
        .bind(file.updated_at)
        .bind(&file.comment)
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }

    async fn update_fields(
        &mut self,
        id: FileId,
        changes: &FileChanges,
    ) -> Result<StoredFile, StoreError> {
        let sql = format!("{SELECT_COLUMNS} WHERE id = $1 FOR UPDATE");
        let row = sqlx::query(&sql)
            .bind(id.0)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(map_sqlx_error)?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        let mut file = parse_file_row(&row)?;
        changes.apply(&mut file, Utc::now());

        sqlx::query(
            "UPDATE files SET name = $2, directory = $3, comment = $4, updated_at = $5 \
             WHERE id = $1",
        )
        .bind(id.0)
        .bind(&file.name)
        .bind(&file.directory)
        .bind(&file.comment)
        .bind(file.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx_error)?;

        Ok(file)
    }

    async fn delete_by_id(&mut self, id: FileId) -> Result<Option<StoredFile>, StoreError> {
        let row = sqlx::query(
            "DELETE FROM files WHERE id = $1 \
             RETURNING id, name, extension, directory, size, created_at, updated_at, comment",
        )
        .bind(id.0)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(map_sqlx_error)?;

        row.as_ref().map(parse_file_row).transpose()
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let PostgresTransaction { tx } = *self;
        tx.commit().await.map_err(map_sqlx_error)
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        let PostgresTransaction { tx } = *self;
        tx.rollback().await.map_err(map_sqlx_error)
    }
}

/// Classifies a sqlx failure; only connectivity errors are retryable
pub(crate) fn map_sqlx_error(error: sqlx::Error) -> StoreError {
    match &error {
        sqlx::Error::Database(db) if db.code().as_deref() == Some(UNIQUE_VIOLATION) => {
            StoreError::Conflict(db.message().to_string())
        }
        sqlx::Error::RowNotFound => StoreError::NotFound(error.to_string()),
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => StoreError::Connection(error.to_string()),
        _ => StoreError::Database(error.to_string()),
    }
}

fn parse_file_row(row: &PgRow) -> Result<StoredFile, StoreError> {
    let size: i64 = row.try_get("size").map_err(map_sqlx_error)?;

    Ok(StoredFile {
        id: FileId(row.try_get::<Uuid, _>("id").map_err(map_sqlx_error)?),
        name: row.try_get("name").map_err(map_sqlx_error)?,
        extension: row.try_get("extension").map_err(map_sqlx_error)?,
        directory: row.try_get("directory").map_err(map_sqlx_error)?,
        size: u64::try_from(size)
            .map_err(|_| StoreError::Database(format!("negative file size {size}")))?,
        created_at: row
            .try_get::<DateTime<Utc>, _>("created_at")
            .map_err(map_sqlx_error)?,
        updated_at: row
            .try_get::<DateTime<Utc>, _>("updated_at")
            .map_err(map_sqlx_error)?,
        comment: row.try_get("comment").map_err(map_sqlx_error)?,
    })
}

fn size_to_db(size: u64) -> Result<i64, StoreError> {
    i64::try_from(size).map_err(|_| StoreError::Database(format!("file size {size} out of range")))
}

fn schema_statements(schema: &str) -> impl Iterator<Item = &str> {
    schema
        .split(';')
        .map(str::trim)
        .filter(|statement| !statement.is_empty())
}
