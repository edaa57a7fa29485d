//! File storage engine
//!
//! Public operations of the file store: add, update, get, delete, lookups,
//! listings and reconciliation of the metadata store against the disk.

pub mod operations;
pub mod reconcile;
pub mod results;

// Re-export public types and functions
pub use operations::{DEFAULT_PAGE_LIMIT, FileStorage, parse_file_id};
pub use reconcile::{QUARANTINE_DIR, TEMP_UPLOAD_GRACE};
pub use results::{FileDownload, FileUpdate, PublicFileView, ReconciliationReport, SizeMismatch};
