//! Metadata record types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use uuid::Uuid;

/// Identifier of a stored file.
///
/// UUIDv7, so identifier order follows creation order and paginated
/// listings are deterministic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileId(pub Uuid);

impl FileId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for FileId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for FileId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Metadata record of one file in the sandbox
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredFile {
    pub id: FileId,
    /// Base name without extension
    pub name: String,
    /// Extension with its leading dot, empty when there is none
    pub extension: String,
    /// Absolute parent directory, always inside the storage root
    pub directory: String,
    pub size: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub comment: Option<String>,
}

impl StoredFile {
    pub fn new(
        name: impl Into<String>,
        extension: impl Into<String>,
        directory: impl Into<String>,
        size: u64,
        comment: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: FileId::new(),
            name: name.into(),
            extension: extension.into(),
            directory: directory.into(),
            size,
            created_at: now,
            updated_at: now,
            comment,
        }
    }

    /// `name` + `extension`
    pub fn file_name(&self) -> String {
        format!("{}{}", self.name, self.extension)
    }

    /// Where the file lives on disk
    pub fn disk_path(&self) -> PathBuf {
        Path::new(&self.directory).join(self.file_name())
    }

    /// Whether this record occupies the given logical location
    pub fn occupies(&self, name: &str, extension: &str, directory: &str) -> bool {
        self.name == name && self.extension == extension && self.directory == directory
    }
}

/// Partial change set for a record.
///
/// `None` leaves a field untouched. For `comment`, `Some(None)` clears it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileChanges {
    pub name: Option<String>,
    pub directory: Option<String>,
    pub comment: Option<Option<String>>,
}

impl FileChanges {
    /// Whether applying these changes moves the file
    pub fn relocates(&self) -> bool {
        self.name.is_some() || self.directory.is_some()
    }

    /// Merges the supplied fields into `file` and refreshes `updated_at`
    pub fn apply(&self, file: &mut StoredFile, now: DateTime<Utc>) {
        if let Some(name) = &self.name {
            file.name = name.clone();
        }
        if let Some(directory) = &self.directory {
            file.directory = directory.clone();
        }
        if let Some(comment) = &self.comment {
            file.comment = comment.clone();
        }
        file.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_file_id_round_trips_through_str() {
        let id = FileId::new();
        assert_eq!(id.to_string().parse::<FileId>().unwrap(), id);
        assert!("not-a-uuid".parse::<FileId>().is_err());
    }

    #[test]
    fn test_disk_path() {
        let file = StoredFile::new("report", ".pdf", "/srv/storage/docs", 10, None);
        assert_eq!(file.disk_path(), PathBuf::from("/srv/storage/docs/report.pdf"));
        assert!(file.occupies("report", ".pdf", "/srv/storage/docs"));
        assert!(!file.occupies("report", ".txt", "/srv/storage/docs"));
    }

    #[test]
    fn test_changes_merge_only_supplied_fields() {
        let mut file = StoredFile::new("a", ".txt", "/root", 3, Some("keep".into()));
        let later = file.updated_at + Duration::seconds(5);

        FileChanges {
            name: Some("b".into()),
            ..Default::default()
        }
        .apply(&mut file, later);

        assert_eq!(file.name, "b");
        assert_eq!(file.extension, ".txt");
        assert_eq!(file.size, 3);
        assert_eq!(file.comment.as_deref(), Some("keep"));
        assert_eq!(file.updated_at, later);
        assert!(file.created_at < file.updated_at);
    }

    #[test]
    fn test_changes_clear_comment() {
        let mut file = StoredFile::new("a", "", "/root", 0, Some("old".into()));
        let changes = FileChanges {
            comment: Some(None),
            ..Default::default()
        };
        assert!(!changes.relocates());
        changes.apply(&mut file, Utc::now());
        assert_eq!(file.comment, None);
    }
}
