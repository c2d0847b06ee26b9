use crate::output::Output;
use anime_sync_config::PathManager;
use anime_sync_core::SyncStatus;
use color_eyre::Result;
use serde_json::json;

pub async fn run_sync(output: &Output) -> Result<()> {
    let paths = PathManager::default();
    paths.ensure_directories().map_err(color_eyre::eyre::Report::msg)?;

    let config = super::load_config(&paths)?;
    config.validate().map_err(color_eyre::eyre::Report::msg)?;

    let sync = super::build_orchestrator(&config, &paths).await?;
    let user = sync.user().clone();
    output.info(format!(
        "Signed in as {}",
        user.email.as_deref().unwrap_or(user.uid.as_str())
    ));

    let snapshot = sync
        .load_and_sync()
        .await
        .map_err(color_eyre::eyre::Report::msg)?;
    sync.flush().await;

    let live_positions = snapshot.progress.values().filter(|entry| !entry.deleted).count();
    match output.format() {
        crate::output::OutputFormat::Human => {
            output.info(format!(
                "{} series, {} episodes, {} watched, {} in-flight positions",
                snapshot.anime.len(),
                snapshot.episode_count(),
                super::status::format_watch_time(snapshot.total_watch_time()),
                live_positions,
            ));
            match sync.status() {
                SyncStatus::Synced => output.success("Cloud synced"),
                SyncStatus::SyncError => {
                    output.warn("Not synced - continuing with local state; the next sync will retry")
                }
                _ => {}
            }
        }
        _ => {
            output.json(&json!({
                "type": "sync_result",
                "status": sync.status().label(),
                "series": snapshot.anime.len(),
                "episodes": snapshot.episode_count(),
                "total_watch_time_secs": snapshot.total_watch_time(),
                "in_flight_positions": live_positions,
            }));
        }
    }

    Ok(())
}
