//! Transfer module
//!
//! Chunked upload and lazy chunked download between byte streams and disk.

pub mod file_ops;
pub mod results;

// Re-export key types and functions
pub use file_ops::{ByteStream, DEFAULT_CHUNK_SIZE, download, upload};
pub use results::UploadResult;
