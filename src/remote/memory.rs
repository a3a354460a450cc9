use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{in_listing, validate_key, ObjectStore, ObjectStoreError, PutMode};

/// Process-local store, used for dry runs and tests.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Vec<u8>>> {
        match self.objects.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(&self, key: &str, body: Vec<u8>, mode: PutMode) -> Result<(), ObjectStoreError> {
        validate_key(key)?;
        let mut objects = self.lock();
        if mode == PutMode::Create && objects.contains_key(key) {
            return Err(ObjectStoreError::AlreadyExists(key.to_string()));
        }
        objects.insert(key.to_string(), body);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, ObjectStoreError> {
        Ok(self.lock().get(key).cloned())
    }

    async fn list(
        &self,
        prefix: &str,
        start_offset: Option<&str>,
    ) -> Result<Vec<String>, ObjectStoreError> {
        Ok(self
            .lock()
            .keys()
            .filter(|key| in_listing(key, prefix, start_offset))
            .cloned()
            .collect())
    }
}
