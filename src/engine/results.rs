//! Result types for file store operations

use bytes::Bytes;
use futures::stream::BoxStream;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

use crate::error::StorageError;

/// Client-facing view of a stored file; `path` never exposes the storage root
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicFileView {
    pub id: String,
    pub name: String,
    pub extension: String,
    /// Directory relative to the root, `/`-rooted (`/` for the root itself)
    pub path: String,
    pub size: u64,
    pub created_at: String,
    pub updated_at: String,
    pub comment: Option<String>,
}

impl PublicFileView {
    /// Full logical path of the file: `path` + `/` + `name` + `extension`
    pub fn logical_path(&self) -> String {
        format!(
            "{}/{}{}",
            self.path.trim_end_matches('/'),
            self.name,
            self.extension
        )
    }
}

/// Partial update of a stored file.
///
/// Absent fields are left unchanged. `comment: null` clears the comment,
/// a missing `comment` keeps it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileUpdate {
    /// New base name; the extension never changes
    #[serde(default)]
    pub name: Option<String>,

    /// New directory, relative to the storage root
    #[serde(default)]
    pub new_dir_path: Option<String>,

    #[serde(
        default,
        deserialize_with = "deserialize_present",
        skip_serializing_if = "Option::is_none"
    )]
    pub comment: Option<Option<String>>,
}

impl FileUpdate {
    pub fn rename(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn move_to(mut self, directory: impl Into<String>) -> Self {
        self.new_dir_path = Some(directory.into());
        self
    }

    pub fn set_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(Some(comment.into()));
        self
    }

    pub fn clear_comment(mut self) -> Self {
        self.comment = Some(None);
        self
    }

    /// Whether the update moves the file on disk
    pub fn relocates(&self) -> bool {
        self.name.is_some() || self.new_dir_path.is_some()
    }
}

/// A present field, even `null`, deserializes to `Some`
fn deserialize_present<'de, D>(deserializer: D) -> Result<Option<Option<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer).map(Some)
}

/// Stream handed back by `get`, plus the name to present the file under
pub struct FileDownload {
    pub stream: BoxStream<'static, Result<Bytes, StorageError>>,
    pub filename: String,
}

impl fmt::Debug for FileDownload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileDownload")
            .field("filename", &self.filename)
            .finish_non_exhaustive()
    }
}

/// A record whose size disagrees with the file on disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeMismatch {
    pub file: PublicFileView,
    pub disk_size: u64,
}

/// Differences found between the metadata store and the storage tree
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationReport {
    /// Files on disk with no record, public paths
    pub orphan_files: Vec<String>,
    /// Records with no file on disk
    pub orphan_records: Vec<PublicFileView>,
    pub size_mismatches: Vec<SizeMismatch>,
    /// Abandoned upload temp files, reported but never quarantined
    #[serde(default)]
    pub stale_uploads: Vec<String>,
    /// Orphan files moved under the quarantine directory
    pub quarantined: Vec<String>,
}

impl ReconciliationReport {
    pub fn is_consistent(&self) -> bool {
        self.orphan_files.is_empty()
            && self.orphan_records.is_empty()
            && self.size_mismatches.is_empty()
            && self.stale_uploads.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn view(path: &str) -> PublicFileView {
        PublicFileView {
            id: "id".into(),
            name: "report".into(),
            extension: ".pdf".into(),
            path: path.into(),
            size: 0,
            created_at: String::new(),
            updated_at: String::new(),
            comment: None,
        }
    }

    #[test]
    fn test_logical_path() {
        assert_eq!(view("/").logical_path(), "/report.pdf");
        assert_eq!(view("/docs/2024").logical_path(), "/docs/2024/report.pdf");
    }

    #[test]
    fn test_update_comment_is_tri_state() {
        let missing: FileUpdate = serde_json::from_str(r#"{"name": "b"}"#).unwrap();
        assert_eq!(missing.comment, None);
        assert_eq!(missing.name.as_deref(), Some("b"));

        let cleared: FileUpdate = serde_json::from_str(r#"{"comment": null}"#).unwrap();
        assert_eq!(cleared.comment, Some(None));
        assert!(!cleared.relocates());

        let set: FileUpdate = serde_json::from_str(r#"{"comment": "hi"}"#).unwrap();
        assert_eq!(set, FileUpdate::default().set_comment("hi"));
    }

    #[test]
    fn test_report_consistency() {
        let mut report = ReconciliationReport::default();
        assert!(report.is_consistent());

        report.orphan_files.push("/stray.bin".into());
        assert!(!report.is_consistent());

        let stale = ReconciliationReport {
            stale_uploads: vec!["/.0190.tmp".into()],
            ..Default::default()
        };
        assert!(!stale.is_consistent());
    }
}
