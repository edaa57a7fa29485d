//! RAX file store - maintenance entry point
//!
//! Connects to the configured metadata store, ensures its schema and reports
//! drift between the store and the storage tree. Pass `--quarantine` to move
//! orphan files out of the way. Needs a `[database]` section: without stored
//! records every file would look like an orphan.

use log::{error, info, warn};
use std::error::Error;
use std::process::ExitCode;
use std::sync::Arc;

use rax_file_store::engine::ReconciliationReport;
use rax_file_store::error::handle_error;
use rax_file_store::metadata::{MetadataStore, PostgresMetadataStore};
use rax_file_store::utils::logging::setup_logging;
use rax_file_store::{FileStorage, StorageError, StoreConfig};

#[tokio::main]
async fn main() -> ExitCode {
    setup_logging();

    let quarantine = std::env::args().skip(1).any(|arg| arg == "--quarantine");

    match run(quarantine).await {
        Ok(report) if report.is_consistent() => ExitCode::SUCCESS,
        Ok(_) => {
            warn!("Storage and metadata are out of sync");
            ExitCode::from(2)
        }
        Err(e) => {
            match e.downcast_ref::<StorageError>() {
                Some(storage_error) => handle_error(storage_error),
                None => error!("Reconciliation failed: {e}"),
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(quarantine: bool) -> Result<ReconciliationReport, Box<dyn Error>> {
    let config = StoreConfig::load()?;
    info!("Loaded configuration, storage root {}", config.storage_dir);

    let Some(database) = &config.database else {
        return Err(StorageError::StoreNotDurable(
            "no [database] section configured, refusing to reconcile".into(),
        )
        .into());
    };

    let store = PostgresMetadataStore::connect(database).await?;
    store.ensure_schema().await?;
    let store: Arc<dyn MetadataStore> = Arc::new(store);

    let storage = FileStorage::from_config(&config, store).await?;
    let report = storage.reconcile(quarantine).await?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(report)
}
