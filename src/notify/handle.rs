use std::sync::Arc;

use crate::remote::{ObjectStore, ObjectStoreError, PutMode};

use super::MessageHandle;

/// Where the status message id lives in the bucket.
pub const HANDLE_KEY: &str = "state/status_message_id.txt";

/// Persists the status message handle next to the readings it reports on.
#[derive(Clone)]
pub struct HandleStore {
    remote: Arc<dyn ObjectStore>,
    key: String,
}

impl HandleStore {
    pub fn new(remote: Arc<dyn ObjectStore>) -> Self {
        Self::with_key(remote, HANDLE_KEY)
    }

    pub fn with_key(remote: Arc<dyn ObjectStore>, key: impl Into<String>) -> Self {
        Self {
            remote,
            key: key.into(),
        }
    }

    pub async fn load(&self) -> Result<Option<MessageHandle>, ObjectStoreError> {
        let Some(bytes) = self.remote.get(&self.key).await? else {
            return Ok(None);
        };
        let text = String::from_utf8_lossy(&bytes);
        let id = text.trim();
        Ok((!id.is_empty()).then(|| MessageHandle::new(id)))
    }

    /// Writes `handle`; `None` clears it so the next publish sends afresh.
    pub async fn save(&self, handle: Option<&MessageHandle>) -> Result<(), ObjectStoreError> {
        let body = handle.map(|h| h.as_str().as_bytes().to_vec()).unwrap_or_default();
        self.remote.put(&self.key, body, PutMode::Overwrite).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::MemoryObjectStore;

    #[tokio::test]
    async fn save_load_and_clear() {
        let store = HandleStore::new(Arc::new(MemoryObjectStore::new()));
        assert_eq!(store.load().await.unwrap(), None);

        store.save(Some(&MessageHandle::new("42"))).await.unwrap();
        assert_eq!(store.load().await.unwrap(), Some(MessageHandle::new("42")));

        store.save(None).await.unwrap();
        assert_eq!(store.load().await.unwrap(), None);
    }
}
