//! File system storage management
//!
//! Handles disk operations, tree scans, and path sandboxing.

pub mod filesystem;
pub mod operations;
pub mod results;
pub mod validation;

// Re-export commonly used validation items
pub use results::DiskEntry;
pub use validation::{MAX_EXTENSION_LENGTH, PathSandbox, split_file_name, validate_file_name};
