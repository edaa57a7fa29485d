pub mod config;
pub mod engine;
pub mod error;
pub mod metadata;
pub mod storage;
pub mod transfer;
pub mod utils;

pub use config::StoreConfig;
pub use engine::FileStorage;
pub use error::StorageError;
