//! Remote durable log port.
//!
//! Keys are `/`-separated paths. Listing always returns keys sorted
//! lexicographically so callers can resume from a known offset.

mod fs;
mod gcs;
mod memory;

pub use fs::FsObjectStore;
pub use gcs::GcsObjectStore;
pub use memory::MemoryObjectStore;

use async_trait::async_trait;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutMode {
    /// Fail with [`ObjectStoreError::AlreadyExists`] if the key is taken.
    Create,
    Overwrite,
}

#[derive(Debug, thiserror::Error)]
pub enum ObjectStoreError {
    #[error("object {0} already exists")]
    AlreadyExists(String),

    #[error("object store I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("object store request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("object store returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("invalid object key '{0}'")]
    InvalidKey(String),
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, key: &str, body: Vec<u8>, mode: PutMode) -> Result<(), ObjectStoreError>;

    /// `Ok(None)` when the key does not exist.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, ObjectStoreError>;

    /// Keys under `prefix` that sort at or after `start_offset`, ascending.
    async fn list(
        &self,
        prefix: &str,
        start_offset: Option<&str>,
    ) -> Result<Vec<String>, ObjectStoreError>;
}

pub(crate) fn validate_key(key: &str) -> Result<(), ObjectStoreError> {
    let bad = key.is_empty()
        || key.starts_with('/')
        || key.split('/').any(|part| part.is_empty() || part == "." || part == "..");
    if bad {
        return Err(ObjectStoreError::InvalidKey(key.to_string()));
    }
    Ok(())
}

pub(crate) fn in_listing(key: &str, prefix: &str, start_offset: Option<&str>) -> bool {
    key.starts_with(prefix) && start_offset.map_or(true, |offset| key >= offset)
}
