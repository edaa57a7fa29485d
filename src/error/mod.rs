//! Error handling
//!
//! Defines error types and handling for the file store.

pub mod handlers;
pub mod types;

pub use handlers::{ErrorPayload, error_code, handle_error, status_code};
pub use types::*;
