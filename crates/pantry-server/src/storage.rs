use std::sync::Arc;

use color_eyre::Result;
use pantry_core::store::{InMemoryStore, KeyValueStore};
use pantry_storage::json_file_store::JsonFileStore;
use tracing::{info, warn};

use crate::config::Config;

/// Open the JSON data file named by the config.
pub fn open_file_store(config: &Config) -> Result<JsonFileStore> {
    let store = JsonFileStore::open(&config.data_file)?;
    let records = store.len()?;
    info!(path = %store.path().display(), records, "opened data file");
    Ok(store)
}

/// Build the store the router will use: the JSON data file, or a volatile map
/// when `--in-memory` was given.
pub fn store_from_config(config: &Config) -> Result<Arc<dyn KeyValueStore>> {
    if config.in_memory {
        warn!("running with an in-memory store; records are lost on exit");
        return Ok(Arc::new(InMemoryStore::new()));
    }
    Ok(Arc::new(open_file_store(config)?))
}
