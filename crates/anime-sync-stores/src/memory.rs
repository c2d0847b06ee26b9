//! In-memory store doubles. Used by the orchestrator and garbage-collector
//! tests; handles are cheap clones over shared state so a test can keep one
//! while the orchestrator owns another.

use crate::error::StoreError;
use crate::traits::{KeyValues, LocalStore, RemoteStore};
use anime_sync_models::UserDocument;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Clone, Default)]
pub struct MemoryStore {
    data: Arc<Mutex<HashMap<String, serde_json::Value>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LocalStore for MemoryStore {
    async fn get(&self, keys: &[&str]) -> KeyValues {
        let data = self.data.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        keys.iter()
            .filter_map(|key| data.get(*key).map(|value| ((*key).to_string(), value.clone())))
            .collect()
    }

    async fn set(&self, update: KeyValues) -> Result<(), StoreError> {
        let mut data = self.data.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        data.extend(update);
        Ok(())
    }
}

#[derive(Default)]
struct RemoteInner {
    documents: Mutex<HashMap<(String, String), UserDocument>>,
    fail_remaining: AtomicU32,
    get_calls: AtomicU32,
    set_calls: AtomicU32,
}

/// Remote double with transient-failure injection for retry/backoff tests.
#[derive(Clone, Default)]
pub struct MemoryRemote {
    inner: Arc<RemoteInner>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` document operations fail with a transient error.
    pub fn fail_next(&self, count: u32) {
        self.inner.fail_remaining.store(count, Ordering::SeqCst);
    }

    pub fn get_calls(&self) -> u32 {
        self.inner.get_calls.load(Ordering::SeqCst)
    }

    pub fn set_calls(&self) -> u32 {
        self.inner.set_calls.load(Ordering::SeqCst)
    }

    pub fn document(&self, collection: &str, id: &str) -> Option<UserDocument> {
        self.inner
            .documents
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&(collection.to_string(), id.to_string()))
            .cloned()
    }

    pub fn insert_document(&self, collection: &str, id: &str, document: UserDocument) {
        self.inner
            .documents
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert((collection.to_string(), id.to_string()), document);
    }

    fn maybe_fail(&self) -> Result<(), StoreError> {
        let remaining = self.inner.fail_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.inner.fail_remaining.store(remaining - 1, Ordering::SeqCst);
            return Err(StoreError::Timeout(Duration::from_secs(0)));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for MemoryRemote {
    fn store_name(&self) -> &str {
        "memory"
    }

    async fn authenticate(&mut self) -> Result<(), StoreError> {
        Ok(())
    }

    fn is_authenticated(&self) -> bool {
        true
    }

    async fn get_document(
        &self,
        collection: &str,
        id: &str,
    ) -> Result<Option<UserDocument>, StoreError> {
        self.inner.get_calls.fetch_add(1, Ordering::SeqCst);
        self.maybe_fail()?;
        Ok(self.document(collection, id))
    }

    async fn set_document(
        &self,
        collection: &str,
        id: &str,
        document: &UserDocument,
    ) -> Result<(), StoreError> {
        self.inner.set_calls.fetch_add(1, Ordering::SeqCst);
        self.maybe_fail()?;
        self.insert_document(collection, id, document.clone());
        Ok(())
    }
}
