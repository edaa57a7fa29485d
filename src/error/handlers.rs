//! Error handlers
//!
//! Maps storage errors to stable codes and the serializable payload handed to
//! the request boundary.

use crate::error::types::StorageError;
use log::{error, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Log a storage error at a level matching its severity
pub fn handle_error(err: &StorageError) {
    if status_code(err) >= 500 {
        error!("File store error [{}]: {}", error_code(err), err);
    } else {
        warn!("File store request rejected [{}]: {}", error_code(err), err);
    }
}

/// Stable machine-readable code for an error
pub fn error_code(err: &StorageError) -> &'static str {
    match err {
        StorageError::PathUnsafe(_) => "PathUnsafeError",
        StorageError::InvalidName(_) => "ValidationError",
        StorageError::InvalidRoot(_) => "InternalError",
        StorageError::FileNotExists(_) => "FileNotExists",
        StorageError::FileAlreadyExists(_) => "FileAlreadyExists",
        StorageError::FileUploadingError(_) => "FileUploadingError",
        StorageError::FileTooLarge(_) => "FileTooLarge",
        StorageError::FileMoveError(_) => "FileMoveError",
        StorageError::FileDownloadingError(_) => "FileDownloadingError",
        StorageError::FileDeletingError(_) => "FileDeletingError",
        StorageError::ScanError(_) => "InternalError",
        StorageError::StoreNotDurable(_) => "StoreNotDurable",
        StorageError::ConnectionError(_) => "ConnectionsError",
        StorageError::DatabaseError(_) => "DbError",
    }
}

/// HTTP-style status for an error
pub fn status_code(err: &StorageError) -> u16 {
    match err {
        StorageError::PathUnsafe(_) => 400,
        StorageError::InvalidName(_) => 422,
        StorageError::FileNotExists(_) => 404,
        StorageError::FileAlreadyExists(_) => 409,
        StorageError::FileTooLarge(_) => 413,
        StorageError::StoreNotDurable(_) => 412,
        StorageError::ConnectionError(_) => 503,
        StorageError::DatabaseError(_) => 502,
        StorageError::InvalidRoot(_)
        | StorageError::FileUploadingError(_)
        | StorageError::FileMoveError(_)
        | StorageError::FileDownloadingError(_)
        | StorageError::FileDeletingError(_)
        | StorageError::ScanError(_) => 500,
    }
}

/// Structured error body: stable code, status, message and optional context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: String,
    pub status: u16,
    pub msg: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub data: Map<String, Value>,
}

impl ErrorPayload {
    /// Attach a context value (e.g. the endpoint or the file id)
    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }
}

impl From<&StorageError> for ErrorPayload {
    fn from(err: &StorageError) -> Self {
        Self {
            code: error_code(err).to_string(),
            status: status_code(err),
            msg: err.to_string(),
            data: Map::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_stable() {
        assert_eq!(
            error_code(&StorageError::FileNotExists("x".into())),
            "FileNotExists"
        );
        assert_eq!(status_code(&StorageError::FileNotExists("x".into())), 404);
        assert_eq!(
            status_code(&StorageError::FileAlreadyExists("x".into())),
            409
        );
        assert_eq!(status_code(&StorageError::PathUnsafe("x".into())), 400);
        assert_eq!(status_code(&StorageError::ConnectionError("x".into())), 503);
        assert_eq!(
            status_code(&StorageError::FileDeletingError("x".into())),
            500
        );
        assert_eq!(status_code(&StorageError::StoreNotDurable("x".into())), 412);
    }

    #[test]
    fn test_payload_serialization() {
        let err = StorageError::FileAlreadyExists("/docs/a.txt".into());
        let payload = ErrorPayload::from(&err).with_data("id", "42");
        let json = serde_json::to_value(&payload).unwrap();

        assert_eq!(json["code"], "FileAlreadyExists");
        assert_eq!(json["status"], 409);
        assert_eq!(json["msg"], "File already exists: /docs/a.txt");
        assert_eq!(json["data"]["id"], "42");
    }

    #[test]
    fn test_payload_omits_empty_data() {
        let err = StorageError::PathUnsafe("../etc".into());
        let json = serde_json::to_string(&ErrorPayload::from(&err)).unwrap();
        assert!(!json.contains("data"));
    }
}
