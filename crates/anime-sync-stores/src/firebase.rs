use crate::error::StoreError;
use crate::traits::RemoteStore;
use anime_sync_config::CredentialStore;
use anime_sync_models::UserDocument;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

const TOKEN_ENDPOINT: &str = "https://securetoken.googleapis.com/v1/token";

/// Cloud document store over the Firebase Realtime Database REST API.
///
/// Documents live at `{database_url}/{collection}/{id}.json` and are read and
/// written whole. Authentication uses a long-lived refresh token exchanged
/// for a short-lived ID token; tokens persist in the credential store so a
/// restart reuses them until they near expiry.
pub struct FirebaseStore {
    client: Client,
    database_url: String,
    api_key: String,
    credentials_path: PathBuf,
    id_token: Option<String>,
    token_expires: Option<DateTime<Utc>>,
    user_id: Option<String>,
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    id_token: String,
    refresh_token: String,
    expires_in: String,
    user_id: String,
}

impl FirebaseStore {
    pub fn new(
        database_url: String,
        api_key: String,
        credentials_path: PathBuf,
    ) -> Result<Self, StoreError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            database_url: database_url.trim_end_matches('/').to_string(),
            api_key,
            credentials_path,
            id_token: None,
            token_expires: None,
            user_id: None,
            email: None,
        })
    }

    /// Identity of the signed-in user, available after `authenticate`.
    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    pub fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }

    fn id_token(&self) -> Result<&str, StoreError> {
        self.id_token
            .as_deref()
            .ok_or_else(|| StoreError::Auth("not authenticated".to_string()))
    }

    fn document_url(&self, collection: &str, id: &str, token: &str) -> String {
        format!(
            "{}/{}/{}.json?auth={}",
            self.database_url, collection, id, token
        )
    }

    fn status_error(status: StatusCode, message: String) -> StoreError {
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => StoreError::Auth(format!(
                "remote rejected credentials ({status}): {message}"
            )),
            _ => StoreError::Http {
                status: status.as_u16(),
                message,
            },
        }
    }
}

#[async_trait]
impl RemoteStore for FirebaseStore {
    fn store_name(&self) -> &str {
        "firebase"
    }

    async fn authenticate(&mut self) -> Result<(), StoreError> {
        let mut cred_store = CredentialStore::new(self.credentials_path.clone());
        cred_store
            .load()
            .map_err(|e| StoreError::Auth(format!("failed to load credentials: {e}")))?;

        self.user_id = cred_store.get_user_id().cloned();
        self.email = cred_store.get_user_email().cloned();

        // Reuse the saved ID token unless it expires within the next 5 minutes.
        if let (Some(token), Some(expires)) =
            (cred_store.get_id_token(), cred_store.get_id_token_expires())
        {
            if expires > Utc::now() + ChronoDuration::minutes(5) {
                self.id_token = Some(token.clone());
                self.token_expires = Some(expires);
                info!("Using saved ID token (expires at {})", expires);
                return Ok(());
            }
            info!(
                "Saved ID token expired or expiring soon (expires at {}), refreshing",
                expires
            );
        }

        let refresh_token = cred_store.get_refresh_token().cloned().ok_or_else(|| {
            StoreError::Auth("no refresh token configured; run `anitrack config account` first".to_string())
        })?;

        let url = format!("{}?key={}", TOKEN_ENDPOINT, self.api_key);
        let response = self
            .client
            .post(&url)
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            if status.is_client_error() {
                return Err(StoreError::Auth(format!(
                    "token refresh rejected ({status}): {message}"
                )));
            }
            return Err(StoreError::Http {
                status: status.as_u16(),
                message,
            });
        }

        let token: RefreshResponse = response.json().await?;
        let expires_in = token.expires_in.parse::<i64>().unwrap_or(3600);
        let expires_at = Utc::now() + ChronoDuration::seconds(expires_in);

        self.id_token = Some(token.id_token.clone());
        self.token_expires = Some(expires_at);
        self.user_id = Some(token.user_id.clone());

        cred_store.set_id_token(token.id_token);
        cred_store.set_refresh_token(token.refresh_token);
        cred_store.set_id_token_expires(expires_at);
        cred_store.set_user_id(token.user_id);
        if let Err(e) = cred_store.save() {
            warn!("Failed to persist refreshed tokens: {}", e);
        }

        info!("Authenticated to Firebase (token expires at {})", expires_at);
        Ok(())
    }

    fn is_authenticated(&self) -> bool {
        self.id_token.is_some()
            && self.user_id.is_some()
            && self.token_expires.map(|expires| expires > Utc::now()).unwrap_or(false)
    }

    async fn get_document(
        &self,
        collection: &str,
        id: &str,
    ) -> Result<Option<UserDocument>, StoreError> {
        let token = self.id_token()?;
        let url = self.document_url(collection, id, token);

        let response = self.client.get(&url).send().await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(Self::status_error(status, message));
        }

        // The database answers `null` for a path that was never written.
        let value: serde_json::Value = response.json().await?;
        if value.is_null() {
            return Ok(None);
        }
        let document = serde_json::from_value(value)?;
        Ok(Some(document))
    }

    async fn set_document(
        &self,
        collection: &str,
        id: &str,
        document: &UserDocument,
    ) -> Result<(), StoreError> {
        let token = self.id_token()?;
        let url = self.document_url(collection, id, token);

        let response = self.client.put(&url).json(document).send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(Self::status_error(status, message));
        }
        Ok(())
    }
}
