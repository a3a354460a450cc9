use std::io::ErrorKind;
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::fs;
use uuid::Uuid;

use super::{in_listing, validate_key, ObjectStore, ObjectStoreError, PutMode};

/// Bucket emulated by a directory tree; key segments map to path components.
///
/// Writes land in a hidden temp file first and are then linked (create) or
/// renamed (overwrite) into place, so readers never see a partial object.
#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        key.split('/').fold(self.root.clone(), |path, part| path.join(part))
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn put(&self, key: &str, body: Vec<u8>, mode: PutMode) -> Result<(), ObjectStoreError> {
        validate_key(key)?;
        let path = self.path_for(key);
        let parent = path
            .parent()
            .ok_or_else(|| ObjectStoreError::InvalidKey(key.to_string()))?;
        fs::create_dir_all(parent).await?;

        let tmp = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        fs::write(&tmp, &body).await?;

        let placed = match mode {
            PutMode::Create => fs::hard_link(&tmp, &path).await,
            PutMode::Overwrite => fs::rename(&tmp, &path).await,
        };
        if mode == PutMode::Create {
            let _ = fs::remove_file(&tmp).await;
        }

        match placed {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                Err(ObjectStoreError::AlreadyExists(key.to_string()))
            }
            Err(err) => {
                let _ = fs::remove_file(&tmp).await;
                Err(err.into())
            }
        }
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, ObjectStoreError> {
        validate_key(key)?;
        match fs::read(self.path_for(key)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn list(
        &self,
        prefix: &str,
        start_offset: Option<&str>,
    ) -> Result<Vec<String>, ObjectStoreError> {
        let mut keys = Vec::new();
        let mut pending = vec![(self.root.clone(), String::new())];

        while let Some((dir, key_prefix)) = pending.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(err) if err.kind() == ErrorKind::NotFound => continue,
                Err(err) => return Err(err.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let name = entry.file_name().to_string_lossy().into_owned();
                if name.starts_with('.') {
                    continue;
                }
                let key = format!("{key_prefix}{name}");
                if entry.file_type().await?.is_dir() {
                    let dir_key = format!("{key}/");
                    // Only descend where matching keys can live.
                    if dir_key.starts_with(prefix) || prefix.starts_with(&dir_key) {
                        pending.push((entry.path(), dir_key));
                    }
                } else if in_listing(&key, prefix, start_offset) {
                    keys.push(key);
                }
            }
        }

        keys.sort();
        Ok(keys)
    }
}
