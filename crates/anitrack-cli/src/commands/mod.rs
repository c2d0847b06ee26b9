pub mod clear;
pub mod config;
pub mod daemon;
pub mod status;
pub mod sync;

use anime_sync_config::{Config, PathManager};
use anime_sync_core::{SyncOrchestrator, UserIdentity};
use anime_sync_stores::{FileStore, FirebaseStore, RemoteStore};
use color_eyre::Result;
use std::sync::Arc;
use std::time::Duration;

pub(crate) fn load_config(paths: &PathManager) -> Result<Config> {
    let config_file = paths.config_file();
    if config_file.exists() {
        Config::load_from_file(&config_file).map_err(|e| {
            color_eyre::eyre::eyre!("Failed to load config from {}: {}", config_file.display(), e)
        })
    } else {
        Ok(Config::default())
    }
}

/// Wire the stores and the signed-in identity into one orchestrator.
pub(crate) async fn build_orchestrator(
    config: &Config,
    paths: &PathManager,
) -> Result<SyncOrchestrator> {
    let remote_config = config
        .remote
        .as_ref()
        .filter(|remote| remote.enabled)
        .ok_or_else(|| {
            color_eyre::eyre::eyre!(
                "No cloud remote configured. Run `anitrack config remote` and `anitrack config account` first."
            )
        })?;

    let mut remote = FirebaseStore::new(
        remote_config.database_url.clone(),
        remote_config.api_key.clone(),
        paths.credentials_file(),
    )?;
    remote.authenticate().await?;
    let uid = remote
        .user_id()
        .ok_or_else(|| color_eyre::eyre::eyre!("Authentication did not yield a user id"))?
        .to_string();
    let email = remote.email().map(str::to_string);

    let local = Arc::new(
        FileStore::new(paths.store_file())
            .with_timeout(Duration::from_millis(config.sync.storage_timeout_ms)),
    );

    Ok(SyncOrchestrator::new(
        local,
        Box::new(remote),
        UserIdentity { uid, email },
        remote_config.collection.clone(),
        config.sync.clone(),
        config.gc.clone(),
    ))
}
