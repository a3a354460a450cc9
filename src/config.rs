use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::catalog::{default_venues, Catalog, Venue, DEFAULT_UTC_OFFSET_MINUTES};
use crate::db::Database;
use crate::fetcher::{DEFAULT_CONCURRENCY, DEFAULT_TIMEOUT_SECS};
use crate::notify::Language;
use crate::remote::{FsObjectStore, GcsObjectStore, MemoryObjectStore, ObjectStore};
use crate::sync::DEFAULT_BATCH_SIZE;

pub const CONFIG_ENV: &str = "CROWDWATCH_CONFIG";
pub const DATABASE_ENV: &str = "CROWDWATCH_DB";
pub const BUCKET_NAME_ENV: &str = "BUCKET_NAME";
pub const PLACE_IDS_ENV: &str = "PLACE_IDS";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BucketBackend {
    Fs,
    Gcs,
    Memory,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BucketConfig {
    /// Defaults to `gcs` when a bucket name is known, `fs` otherwise.
    pub backend: Option<BucketBackend>,
    pub root: PathBuf,
    pub name: Option<String>,
    pub api_base: Option<String>,
}

impl Default for BucketConfig {
    fn default() -> Self {
        Self {
            backend: None,
            root: PathBuf::from("bucket"),
            name: None,
            api_base: None,
        }
    }
}

impl BucketConfig {
    pub fn effective_backend(&self) -> BucketBackend {
        match (self.backend, &self.name) {
            (Some(backend), _) => backend,
            (None, Some(_)) => BucketBackend::Gcs,
            (None, None) => BucketBackend::Fs,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub concurrency: usize,
    pub timeout_secs: u64,
    pub details_url: Option<String>,
    pub search_url: Option<String>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            details_url: None,
            search_url: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    pub api_base: Option<String>,
    pub language: Language,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub batch_size: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    /// Built-in schedule; `None` leaves triggering to external callers.
    pub interval_secs: Option<u64>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".into(),
            interval_secs: None,
        }
    }
}

/// Service configuration. Secrets are not part of it, see [`Credentials`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub venues: Vec<Venue>,
    pub utc_offset_minutes: i32,
    pub bucket: BucketConfig,
    /// SQLite path. Setting it turns on local mode.
    pub database: Option<PathBuf>,
    pub fetch: FetchConfig,
    pub notify: NotifyConfig,
    pub sync: SyncConfig,
    pub server: ServerConfig,
    pub skip_closed_venues: bool,
    /// Venue ids from `PLACE_IDS`; never read from the file.
    #[serde(skip)]
    pub place_ids: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            venues: Vec::new(),
            utc_offset_minutes: DEFAULT_UTC_OFFSET_MINUTES,
            bucket: BucketConfig::default(),
            database: None,
            fetch: FetchConfig::default(),
            notify: NotifyConfig::default(),
            sync: SyncConfig::default(),
            server: ServerConfig::default(),
            skip_closed_venues: true,
            place_ids: Vec::new(),
        }
    }
}

impl Config {
    /// Reads the JSON file (if any) and applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with(path, |key| std::env::var(key).ok())
    }

    pub fn load_with(path: Option<&Path>, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let from_env = env(CONFIG_ENV).map(PathBuf::from);
        let path = path.map(Path::to_path_buf).or(from_env);

        let mut config = match path {
            Some(path) => {
                let contents = fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read config from {}", path.display()))?;
                serde_json::from_str(&contents)
                    .with_context(|| format!("Failed to parse config {}", path.display()))?
            }
            None => Config::default(),
        };

        config.apply_env(env);
        Ok(config)
    }

    fn apply_env(&mut self, env: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| env(key).filter(|value| !value.trim().is_empty());

        if let Some(name) = non_empty(BUCKET_NAME_ENV) {
            self.bucket.name = Some(name);
        }
        if let Some(db) = non_empty(DATABASE_ENV) {
            self.database = Some(PathBuf::from(db));
        }
        if let Some(ids) = non_empty(PLACE_IDS_ENV) {
            self.place_ids = ids
                .split(',')
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(str::to_string)
                .collect();
        }
    }

    pub fn catalog(&self) -> Result<Catalog> {
        let venues = if self.venues.is_empty() {
            default_venues()
        } else {
            self.venues.clone()
        };
        Ok(Catalog::from_offset_minutes(venues, self.utc_offset_minutes)?.restrict_to(&self.place_ids))
    }

    pub fn object_store(&self, credentials: &Credentials) -> Result<Arc<dyn ObjectStore>> {
        Ok(match self.bucket.effective_backend() {
            BucketBackend::Fs => Arc::new(FsObjectStore::new(self.bucket.root.clone())),
            BucketBackend::Memory => Arc::new(MemoryObjectStore::new()),
            BucketBackend::Gcs => {
                let Some(name) = self.bucket.name.clone() else {
                    bail!("bucket.backend is gcs but no bucket name is set ({BUCKET_NAME_ENV})");
                };
                let store = GcsObjectStore::new(name, credentials.gcs_access_token.clone())?;
                match &self.bucket.api_base {
                    Some(base) => Arc::new(store.with_api_base(base.clone())),
                    None => Arc::new(store),
                }
            }
        })
    }

    pub fn open_database(&self) -> Result<Option<Database>> {
        self.database
            .as_ref()
            .map(|path| Database::new(path.clone()))
            .transpose()
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch.timeout_secs.max(1))
    }
}

/// Secrets, read from the environment only.
#[derive(Clone, Default)]
pub struct Credentials {
    pub google_api_key: Option<String>,
    pub telegram_bot_token: Option<String>,
    pub telegram_chat_id: Option<String>,
    pub gcs_access_token: Option<String>,
}

impl Credentials {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(env: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| env(key).filter(|value| !value.trim().is_empty());
        Self {
            google_api_key: get("GOOGLE_API_KEY"),
            telegram_bot_token: get("TELEGRAM_BOT_TOKEN"),
            telegram_chat_id: get("TELEGRAM_CHAT_ID"),
            gcs_access_token: get("GCS_ACCESS_TOKEN"),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn redact(value: &Option<String>) -> &'static str {
            if value.is_some() {
                "<redacted>"
            } else {
                "<unset>"
            }
        }
        f.debug_struct("Credentials")
            .field("google_api_key", &redact(&self.google_api_key))
            .field("telegram_bot_token", &redact(&self.telegram_bot_token))
            .field("telegram_chat_id", &self.telegram_chat_id)
            .field("gcs_access_token", &redact(&self.gcs_access_token))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults_without_file_or_env() {
        let config = Config::load_with(None, env(&[])).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.bucket.effective_backend(), BucketBackend::Fs);

        let catalog = config.catalog().unwrap();
        assert_eq!(catalog.active().count(), 1);
    }

    #[test]
    fn file_sections_and_env_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("crowdwatch.json");
        fs::write(
            &path,
            r#"{
                "venues": [{"place_ref": "a", "name": "Alpha"}, {"place_ref": "b", "name": "Beta"}],
                "fetch": {"concurrency": 2},
                "notify": {"language": "he"},
                "server": {"interval_secs": 900}
            }"#,
        )
        .unwrap();

        let config = Config::load_with(
            None,
            env(&[
                (CONFIG_ENV, path.to_str().unwrap()),
                (BUCKET_NAME_ENV, "crowd-bucket"),
                (DATABASE_ENV, "/tmp/crowd.db"),
                (PLACE_IDS_ENV, "b, c"),
            ]),
        )
        .unwrap();

        assert_eq!(config.fetch.concurrency, 2);
        assert_eq!(config.fetch.timeout_secs, DEFAULT_TIMEOUT_SECS);
        assert_eq!(config.notify.language, Language::He);
        assert_eq!(config.server.interval_secs, Some(900));
        assert_eq!(config.bucket.effective_backend(), BucketBackend::Gcs);
        assert_eq!(config.database, Some(PathBuf::from("/tmp/crowd.db")));

        let catalog = config.catalog().unwrap();
        let active: Vec<&str> = catalog.active().map(|v| v.place_ref.as_str()).collect();
        assert_eq!(active, vec!["b", "c"]);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(Config::load_with(Some(&path), env(&[])).is_err());
    }

    #[test]
    fn credentials_debug_hides_secrets() {
        let creds = Credentials::from_lookup(env(&[
            ("GOOGLE_API_KEY", "g-secret"),
            ("TELEGRAM_BOT_TOKEN", "t-secret"),
            ("TELEGRAM_CHAT_ID", "-100"),
        ]));
        let debug = format!("{creds:?}");
        assert!(!debug.contains("g-secret"));
        assert!(!debug.contains("t-secret"));
        assert!(debug.contains("<unset>"));
    }
}
