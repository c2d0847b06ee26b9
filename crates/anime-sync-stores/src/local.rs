use crate::error::StoreError;
use crate::traits::{KeyValues, LocalStore};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::io::ErrorKind;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, warn};

/// Device key-value store backed by a single JSON file.
///
/// Reads are bounded by a timeout and degrade to "no data" on any failure;
/// the host may tear the process down at any moment, so a missing or
/// unreadable file is normal, not an error. Writes go through a temp file
/// and rename so a crash mid-write leaves the previous state intact.
pub struct FileStore {
    path: PathBuf,
    timeout: Duration,
}

impl FileStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            timeout: Duration::from_secs(5),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn read_all(&self) -> Result<Map<String, Value>, StoreError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => match serde_json::from_str::<Value>(&content) {
                Ok(Value::Object(map)) => Ok(map),
                Ok(_) | Err(_) => {
                    warn!(
                        "Store corruption detected at {}. Deleting corrupted file.",
                        self.path.display()
                    );
                    if let Err(rm_err) = tokio::fs::remove_file(&self.path).await {
                        warn!("Failed to delete corrupted store file: {}", rm_err);
                    }
                    Ok(Map::new())
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(Map::new()),
            Err(err) => Err(err.into()),
        }
    }

    async fn write_all(&self, map: &Map<String, Value>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_string_pretty(map)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl LocalStore for FileStore {
    async fn get(&self, keys: &[&str]) -> KeyValues {
        let map = match tokio::time::timeout(self.timeout, self.read_all()).await {
            Ok(Ok(map)) => map,
            Ok(Err(err)) => {
                warn!("Device store read failed, treating as empty: {}", err);
                return KeyValues::new();
            }
            Err(_) => {
                warn!("Device store read timed out after {:?}", self.timeout);
                return KeyValues::new();
            }
        };

        keys.iter()
            .filter_map(|key| map.get(*key).map(|value| ((*key).to_string(), value.clone())))
            .collect()
    }

    async fn set(&self, data: KeyValues) -> Result<(), StoreError> {
        let write = async {
            let mut map = self.read_all().await?;
            for (key, value) in data {
                map.insert(key, value);
            }
            self.write_all(&map).await?;
            debug!("Device store updated at {}", self.path.display());
            Ok(())
        };

        match tokio::time::timeout(self.timeout, write).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(self.timeout)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store_in(dir: &tempfile::TempDir) -> FileStore {
        FileStore::new(dir.path().join("store.json"))
    }

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        let mut data = KeyValues::new();
        data.insert("userId".to_string(), json!("uid-1"));
        data.insert("animeData".to_string(), json!({"bleach": {"title": "Bleach"}}));
        store.set(data).await.unwrap();

        let loaded = store.get(&["userId", "animeData", "videoProgress"]).await;
        assert_eq!(loaded["userId"], json!("uid-1"));
        assert_eq!(loaded["animeData"]["bleach"]["title"], json!("Bleach"));
        assert!(!loaded.contains_key("videoProgress"));
    }

    #[tokio::test]
    async fn missing_file_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        assert!(store.get(&["animeData"]).await.is_empty());
    }

    #[tokio::test]
    async fn corrupt_file_is_reset_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        std::fs::write(&path, "{not json").unwrap();

        let store = FileStore::new(path.clone());
        assert!(store.get(&["animeData"]).await.is_empty());

        // A subsequent write starts from a clean slate.
        let mut data = KeyValues::new();
        data.insert("userId".to_string(), json!("uid-2"));
        store.set(data).await.unwrap();
        assert_eq!(store.get(&["userId"]).await["userId"], json!("uid-2"));
    }

    #[tokio::test]
    async fn set_preserves_unrelated_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        let mut first = KeyValues::new();
        first.insert("animeData".to_string(), json!({}));
        first.insert("userId".to_string(), json!("uid-1"));
        store.set(first).await.unwrap();

        let mut second = KeyValues::new();
        second.insert("videoProgress".to_string(), json!({}));
        store.set(second).await.unwrap();

        let loaded = store.get(&["animeData", "videoProgress", "userId"]).await;
        assert_eq!(loaded.len(), 3);
    }
}
