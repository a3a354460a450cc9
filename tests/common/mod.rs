//! Fakes shared by the integration tests.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, TimeZone, Utc};

use crowdwatch_lib::catalog::{Catalog, Venue};
use crowdwatch_lib::cycle::AppContext;
use crowdwatch_lib::db::Database;
use crowdwatch_lib::fetcher::{FetchError, OccupancyFetcher, OccupancySource};
use crowdwatch_lib::notify::{
    EditOutcome, HandleStore, Language, MessageHandle, NotificationRenderer, Notifier, NotifyError,
};
use crowdwatch_lib::remote::{MemoryObjectStore, ObjectStore, ObjectStoreError, PutMode};
use crowdwatch_lib::store::ReadingStore;

pub fn offset() -> FixedOffset {
    FixedOffset::east_opt(7200).unwrap()
}

pub fn at(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 28, hour, minute, 0).unwrap()
}

pub fn venue(place_ref: &str, name: &str) -> Venue {
    let mut venue = Venue::bare(place_ref);
    venue.name = name.to_string();
    venue
}

/// Source answering from a fixed table; unknown venues are rejected.
pub struct ScriptedSource {
    values: HashMap<String, Result<Option<i64>, String>>,
}

impl ScriptedSource {
    pub fn new(values: &[(&str, Result<Option<i64>, &str>)]) -> Self {
        Self {
            values: values
                .iter()
                .map(|(k, v)| (k.to_string(), v.map_err(str::to_string)))
                .collect(),
        }
    }
}

#[async_trait]
impl OccupancySource for ScriptedSource {
    async fn current_popularity(&self, venue: &Venue) -> Result<Option<i64>, FetchError> {
        match self.values.get(&venue.place_ref) {
            Some(Ok(value)) => Ok(*value),
            Some(Err(reason)) => Err(FetchError::Rejected(reason.clone())),
            None => Err(FetchError::Rejected("unknown venue".into())),
        }
    }
}

/// Chat that keeps every message it holds and counts sends.
#[derive(Default)]
pub struct FakeChat {
    state: Mutex<ChatState>,
}

#[derive(Default)]
struct ChatState {
    next_id: u64,
    messages: HashMap<String, String>,
    deleted: HashSet<String>,
    sends: usize,
    edits: usize,
    deletes: usize,
}

impl FakeChat {
    pub fn live_messages(&self) -> usize {
        self.state.lock().unwrap().messages.len()
    }

    pub fn sends(&self) -> usize {
        self.state.lock().unwrap().sends
    }

    pub fn edits(&self) -> usize {
        self.state.lock().unwrap().edits
    }

    pub fn text(&self, handle: &MessageHandle) -> Option<String> {
        self.state.lock().unwrap().messages.get(handle.as_str()).cloned()
    }

    pub fn deletes(&self) -> usize {
        self.state.lock().unwrap().deletes
    }

    /// Removes a message behind the service's back.
    pub fn remove_message(&self, handle: &MessageHandle) {
        let mut state = self.state.lock().unwrap();
        state.messages.remove(handle.as_str());
        state.deleted.insert(handle.as_str().to_string());
    }
}

#[async_trait]
impl Notifier for FakeChat {
    async fn send(&self, text: &str) -> Result<MessageHandle, NotifyError> {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        state.sends += 1;
        let id = state.next_id.to_string();
        state.messages.insert(id.clone(), text.to_string());
        Ok(MessageHandle::new(id))
    }

    async fn edit(&self, handle: &MessageHandle, text: &str) -> Result<EditOutcome, NotifyError> {
        let mut state = self.state.lock().unwrap();
        let Some(current) = state.messages.get_mut(handle.as_str()) else {
            return Err(NotifyError::Stale("message to edit not found".into()));
        };
        if current == text {
            return Ok(EditOutcome::Unchanged);
        }
        *current = text.to_string();
        state.edits += 1;
        Ok(EditOutcome::Edited)
    }

    async fn delete(&self, handle: &MessageHandle) -> Result<(), NotifyError> {
        let mut state = self.state.lock().unwrap();
        state.messages.remove(handle.as_str());
        state.deleted.insert(handle.as_str().to_string());
        state.deletes += 1;
        Ok(())
    }
}

/// Object store wrapper with switchable failures.
pub struct FlakyStore {
    inner: MemoryObjectStore,
    fail_puts_under: Mutex<Option<String>>,
    fail_gets_for: Mutex<HashSet<String>>,
    /// `get` calls after this many succeed never resolve.
    hang_after_gets: Mutex<Option<usize>>,
    gets: AtomicUsize,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self {
            inner: MemoryObjectStore::new(),
            fail_puts_under: Mutex::new(None),
            fail_gets_for: Mutex::new(HashSet::new()),
            hang_after_gets: Mutex::new(None),
            gets: AtomicUsize::new(0),
        }
    }

    pub fn fail_puts_under(&self, prefix: &str) {
        *self.fail_puts_under.lock().unwrap() = Some(prefix.to_string());
    }

    pub fn fail_get(&self, key: &str) {
        self.fail_gets_for.lock().unwrap().insert(key.to_string());
    }

    pub fn hang_after_gets(&self, count: Option<usize>) {
        self.gets.store(0, Ordering::SeqCst);
        *self.hang_after_gets.lock().unwrap() = count;
    }

    pub fn heal(&self) {
        *self.fail_puts_under.lock().unwrap() = None;
        self.fail_gets_for.lock().unwrap().clear();
        *self.hang_after_gets.lock().unwrap() = None;
    }
}

#[async_trait]
impl ObjectStore for FlakyStore {
    async fn put(&self, key: &str, body: Vec<u8>, mode: PutMode) -> Result<(), ObjectStoreError> {
        let failing = self.fail_puts_under.lock().unwrap().clone();
        if failing.is_some_and(|prefix| key.starts_with(&prefix)) {
            return Err(ObjectStoreError::Http {
                status: 503,
                body: "unavailable".into(),
            });
        }
        self.inner.put(key, body, mode).await
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, ObjectStoreError> {
        let limit = *self.hang_after_gets.lock().unwrap();
        if let Some(limit) = limit {
            if self.gets.fetch_add(1, Ordering::SeqCst) >= limit {
                std::future::pending::<()>().await;
            }
        }
        let failing = self.fail_gets_for.lock().unwrap().contains(key);
        if failing {
            return Err(ObjectStoreError::Http {
                status: 500,
                body: "boom".into(),
            });
        }
        self.inner.get(key).await
    }

    async fn list(
        &self,
        prefix: &str,
        start_offset: Option<&str>,
    ) -> Result<Vec<String>, ObjectStoreError> {
        self.inner.list(prefix, start_offset).await
    }
}

pub struct Harness {
    pub ctx: AppContext,
    pub chat: Arc<FakeChat>,
    pub remote: Arc<FlakyStore>,
    pub db: Database,
    _dir: tempfile::TempDir,
}

/// Full pipeline over fakes, in local mode.
pub fn harness(venues: Vec<Venue>, source: ScriptedSource) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::new(dir.path().join("crowdwatch.db")).unwrap();
    let catalog = Arc::new(Catalog::new(venues, offset()).unwrap());
    let remote = Arc::new(FlakyStore::new());
    let remote_dyn: Arc<dyn ObjectStore> = remote.clone();
    let store = ReadingStore::new(remote_dyn.clone(), Some(db.clone()), catalog.clone());
    let fetcher = OccupancyFetcher::new(Arc::new(source), offset());
    let chat = Arc::new(FakeChat::default());
    let renderer = NotificationRenderer::new(chat.clone(), Language::En, offset());
    let handles = HandleStore::new(remote_dyn);

    Harness {
        ctx: AppContext::new(catalog, store, fetcher, renderer, handles),
        chat,
        remote,
        db,
        _dir: dir,
    }
}
