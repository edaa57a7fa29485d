//! Transfer result types
//!
//! Defines result structures returned by transfer operations.

/// Outcome of a completed upload stream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UploadResult {
    /// Bytes written to the sink
    pub bytes: u64,
    /// Number of chunk writes issued
    pub chunks: usize,
}
