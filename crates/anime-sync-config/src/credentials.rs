use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use toml;

#[derive(Debug, Serialize, Deserialize, Default)]
struct CredentialsData {
    #[serde(flatten)]
    data: HashMap<String, String>,
}

pub struct CredentialStore {
    path: PathBuf,
    credentials: HashMap<String, String>,
}

impl CredentialStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            credentials: HashMap::new(),
        }
    }

    pub fn load(&mut self) -> Result<()> {
        if self.path.exists() {
            let content = std::fs::read_to_string(&self.path)?;
            let creds_data: CredentialsData = toml::from_str(&content)?;
            self.credentials = creds_data.data;
        }
        Ok(())
    }

    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let creds_data = CredentialsData {
            data: self.credentials.clone(),
        };
        let content = toml::to_string_pretty(&creds_data)?;
        std::fs::write(&self.path, content)?;
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&String> {
        self.credentials.get(key)
    }

    pub fn set(&mut self, key: String, value: String) {
        self.credentials.insert(key, value);
    }

    pub fn remove(&mut self, key: &str) {
        self.credentials.remove(key);
    }

    pub fn get_all_keys(&self) -> Vec<String> {
        self.credentials.keys().cloned().collect()
    }

    // Convenience methods for the cloud account
    pub fn get_user_id(&self) -> Option<&String> {
        self.get("user_id")
    }

    pub fn set_user_id(&mut self, uid: String) {
        self.set("user_id".to_string(), uid);
    }

    pub fn get_user_email(&self) -> Option<&String> {
        self.get("user_email")
    }

    pub fn set_user_email(&mut self, email: String) {
        self.set("user_email".to_string(), email);
    }

    pub fn get_refresh_token(&self) -> Option<&String> {
        self.get("refresh_token")
    }

    pub fn set_refresh_token(&mut self, token: String) {
        self.set("refresh_token".to_string(), token);
    }

    pub fn get_id_token(&self) -> Option<&String> {
        self.get("id_token")
    }

    pub fn set_id_token(&mut self, token: String) {
        self.set("id_token".to_string(), token);
    }

    pub fn get_id_token_expires(&self) -> Option<DateTime<Utc>> {
        self.get("id_token_expires")
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
    }

    pub fn set_id_token_expires(&mut self, expires: DateTime<Utc>) {
        self.set("id_token_expires".to_string(), expires.to_rfc3339());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn persists_and_reloads_tokens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.toml");

        let mut store = CredentialStore::new(path.clone());
        store.set_user_id("uid-123".to_string());
        store.set_refresh_token("refresh-abc".to_string());
        let expires = Utc::now() + chrono::Duration::hours(1);
        store.set_id_token_expires(expires);
        store.save().unwrap();

        let mut reloaded = CredentialStore::new(path);
        reloaded.load().unwrap();
        assert_eq!(reloaded.get_user_id().map(String::as_str), Some("uid-123"));
        assert_eq!(reloaded.get_refresh_token().map(String::as_str), Some("refresh-abc"));
        let roundtripped = reloaded.get_id_token_expires().unwrap();
        assert_eq!(roundtripped.timestamp(), expires.timestamp());
    }

    #[test]
    fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = CredentialStore::new(dir.path().join("absent.toml"));
        store.load().unwrap();
        assert!(store.get_user_id().is_none());
    }
}
