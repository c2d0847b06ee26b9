use crate::output::Output;
use crate::ConfigCommands;
use anime_sync_config::{CredentialStore, PathManager, RemoteConfig};
use anime_sync_stores::{FirebaseStore, RemoteStore};
use color_eyre::Result;
use serde_json::json;

pub async fn run_config(cmd: Option<ConfigCommands>, output: &Output) -> Result<()> {
    let paths = PathManager::default();
    paths.ensure_directories().map_err(color_eyre::eyre::Report::msg)?;

    match cmd.unwrap_or(ConfigCommands::Show) {
        ConfigCommands::Show => run_show(&paths, output),
        ConfigCommands::Remote {
            database_url,
            api_key,
            collection,
            disable,
        } => run_remote(&paths, database_url, api_key, collection, disable, output),
        ConfigCommands::Account {
            refresh_token,
            email,
        } => run_account(&paths, refresh_token, email, output).await,
    }
}

fn run_show(paths: &PathManager, output: &Output) -> Result<()> {
    let config = super::load_config(paths)?;
    let mut cred_store = CredentialStore::new(paths.credentials_file());
    let _ = cred_store.load();

    if output.format() != crate::output::OutputFormat::Human {
        output.json(&json!({
            "type": "config",
            "remote": config.remote.as_ref().map(|r| json!({
                "enabled": r.enabled,
                "database_url": r.database_url,
                "api_key": mask(&r.api_key),
                "collection": r.collection,
            })),
            "sync": {
                "save_debounce_ms": config.sync.save_debounce_ms,
                "max_save_retries": config.sync.max_save_retries,
                "retry_base_delay_ms": config.sync.retry_base_delay_ms,
                "max_retry_delay_ms": config.sync.max_retry_delay_ms,
            },
            "gc": {
                "orphan_max_age_days": config.gc.orphan_max_age_days,
                "tombstone_retention_days": config.gc.tombstone_retention_days,
            },
            "account": cred_store.get_user_email(),
        }));
        return Ok(());
    }

    match &config.remote {
        Some(remote) => {
            output.info(format!(
                "Remote: {} ({})",
                remote.database_url,
                if remote.enabled { "enabled" } else { "disabled" }
            ));
            output.info(format!("  collection: {}", remote.collection));
            output.info(format!("  api key: {}", mask(&remote.api_key)));
        }
        None => output.warn("Remote: not configured"),
    }

    match (cred_store.get_user_email(), cred_store.get_user_id()) {
        (Some(email), _) => output.info(format!("Account: {}", email)),
        (None, Some(uid)) => output.info(format!("Account: {}", uid)),
        (None, None) => output.warn("Account: no refresh token stored"),
    }
    if let Some(expires) = cred_store.get_id_token_expires() {
        output.info(format!("  session token valid until {}", expires.format("%Y-%m-%d %H:%M")));
    }

    output.info(format!(
        "Sync: debounce {}ms, {} retries, backoff {}ms..{}ms",
        config.sync.save_debounce_ms,
        config.sync.max_save_retries,
        config.sync.retry_base_delay_ms,
        config.sync.max_retry_delay_ms,
    ));
    output.info(format!(
        "GC: orphans after {} days, tombstones after {} days",
        config.gc.orphan_max_age_days, config.gc.tombstone_retention_days,
    ));

    Ok(())
}

fn run_remote(
    paths: &PathManager,
    database_url: Option<String>,
    api_key: Option<String>,
    collection: Option<String>,
    disable: bool,
    output: &Output,
) -> Result<()> {
    let mut config = super::load_config(paths)?;

    let mut remote = config.remote.take().unwrap_or(RemoteConfig {
        enabled: true,
        database_url: String::new(),
        api_key: String::new(),
        collection: "users".to_string(),
    });

    if let Some(database_url) = database_url {
        remote.database_url = database_url.trim_end_matches('/').to_string();
    }
    if let Some(api_key) = api_key {
        remote.api_key = api_key;
    }
    if let Some(collection) = collection {
        remote.collection = collection;
    }
    remote.enabled = !disable;

    config.remote = Some(remote);
    config.validate().map_err(color_eyre::eyre::Report::msg)?;
    config
        .save_to_file(&paths.config_file())
        .map_err(color_eyre::eyre::Report::msg)?;

    if disable {
        output.success("Cloud sync disabled");
    } else {
        output.success(format!("Remote configured: {}", paths.config_file().display()));
    }
    Ok(())
}

async fn run_account(
    paths: &PathManager,
    refresh_token: String,
    email: Option<String>,
    output: &Output,
) -> Result<()> {
    let mut cred_store = CredentialStore::new(paths.credentials_file());
    cred_store.load().map_err(color_eyre::eyre::Report::msg)?;

    cred_store.set_refresh_token(refresh_token);
    if let Some(email) = email {
        cred_store.set_user_email(email);
    }
    // Invalidate the cached session token so the new account takes effect on
    // the next authentication.
    cred_store.remove("id_token");
    cred_store.remove("id_token_expires");
    cred_store.save().map_err(color_eyre::eyre::Report::msg)?;
    output.success("Account credentials stored");

    // Resolve the user id right away when a remote is configured, so status
    // output can show who is signed in.
    let config = super::load_config(paths)?;
    if let Some(remote_config) = config.remote.as_ref().filter(|r| r.enabled) {
        let mut remote = FirebaseStore::new(
            remote_config.database_url.clone(),
            remote_config.api_key.clone(),
            paths.credentials_file(),
        )?;
        match remote.authenticate().await {
            Ok(()) => {
                if let Some(uid) = remote.user_id() {
                    output.success(format!("Signed in as {}", uid));
                }
            }
            Err(err) => {
                output.warn(format!(
                    "Credentials stored but sign-in failed: {}. They will be retried on the next sync.",
                    err
                ));
            }
        }
    }

    Ok(())
}

fn mask(secret: &str) -> String {
    if secret.len() <= 4 {
        "****".to_string()
    } else {
        format!("{}****", &secret[..4])
    }
}
