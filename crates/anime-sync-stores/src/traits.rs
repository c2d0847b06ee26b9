use crate::error::StoreError;
use anime_sync_models::UserDocument;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;

pub type KeyValues = HashMap<String, Value>;

/// The on-device key-value store.
///
/// `get` never fails: a timeout, a missing backing file, or a torn-down host
/// context all resolve to an empty map; callers proceed with "no data".
/// `set` errors only on a genuine, non-transient storage failure.
#[async_trait]
pub trait LocalStore: Send + Sync {
    async fn get(&self, keys: &[&str]) -> KeyValues;
    async fn set(&self, data: KeyValues) -> Result<(), StoreError>;
}

/// The cloud document store, keyed by user identity. Whole-document
/// overwrite semantics only; no partial-field updates are relied upon.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    fn store_name(&self) -> &str;

    async fn authenticate(&mut self) -> Result<(), StoreError>;
    fn is_authenticated(&self) -> bool;

    /// Fetch the user's document; `None` when it does not exist yet.
    async fn get_document(&self, collection: &str, id: &str)
        -> Result<Option<UserDocument>, StoreError>;

    /// Overwrite the user's document.
    async fn set_document(
        &self,
        collection: &str,
        id: &str,
        document: &UserDocument,
    ) -> Result<(), StoreError>;
}
