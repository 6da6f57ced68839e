mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use log::info;
use std::sync::Arc;
use thiserror::Error;
use crate::cli::Args;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("state file IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("state serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unsupported state store type: {0}")]
    UnsupportedType(String),
}

/// Durable string records, the browser's `localStorage` shape.
///
/// Calls complete synchronously; nothing in the conversation layer awaits a write.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Writes several records as one snapshot. Backends that can replace their
    /// storage in one step override this.
    fn set_many(&self, entries: &[(&str, String)]) -> Result<(), StoreError> {
        for (key, value) in entries {
            self.set(key, value)?;
        }
        Ok(())
    }
}

pub fn create_state_store(args: &Args) -> Result<Arc<dyn KeyValueStore>, StoreError> {
    match args.state_type.to_lowercase().as_str() {
        "file" => {
            let store = FileStore::open(&args.state_path)?;
            Ok(Arc::new(store))
        }
        "memory" => Ok(Arc::new(MemoryStore::new())),
        other => Err(StoreError::UnsupportedType(other.to_string())),
    }
}

pub fn initialize_state_store(args: &Args) -> Result<Arc<dyn KeyValueStore>, StoreError> {
    info!("Chat state will be stored in: {} at {}", args.state_type, args.state_path);
    create_state_store(args)
}
