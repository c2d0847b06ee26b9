use crate::output::{Output, OutputFormat};
use anime_sync_config::{CredentialStore, PathManager};
use anime_sync_models::Snapshot;
use anime_sync_stores::{FileStore, LocalStore};
use chrono::{DateTime, Utc};
use color_eyre::Result;
use comfy_table::{presets::UTF8_FULL_CONDENSED, Cell, Table};
use serde_json::{json, Value};

pub async fn run_status(show_progress: bool, output: &Output) -> Result<()> {
    let paths = PathManager::default();
    let store = FileStore::new(paths.store_file());
    let values = store.get(&["animeData", "videoProgress", "userId"]).await;

    let user_id = values
        .get("userId")
        .and_then(Value::as_str)
        .map(str::to_string);

    let mut doc = serde_json::Map::new();
    for key in ["animeData", "videoProgress"] {
        if let Some(value) = values.get(key) {
            doc.insert(key.to_string(), value.clone());
        }
    }
    let snapshot: Snapshot = serde_json::from_value(Value::Object(doc)).unwrap_or_default();

    if output.format() != OutputFormat::Human {
        output.json(&status_json(&snapshot, user_id.as_deref(), show_progress));
        return Ok(());
    }

    let mut cred_store = CredentialStore::new(paths.credentials_file());
    let _ = cred_store.load();
    match (cred_store.get_user_email(), &user_id) {
        (Some(email), _) => output.info(format!("Account: {}", email)),
        (None, Some(uid)) => output.info(format!("Account: {}", uid)),
        (None, None) => output.warn("No account signed in yet"),
    }

    if snapshot.anime.is_empty() {
        output.info("No series tracked yet");
    } else {
        let mut table = Table::new();
        table.load_preset(UTF8_FULL_CONDENSED);
        table.set_header(vec!["Title", "Episodes", "Watch time", "Last watched"]);

        // Most recently watched first.
        let mut records: Vec<_> = snapshot.anime.values().collect();
        records.sort_by_key(|record| std::cmp::Reverse(record.last_watched));
        for record in records {
            table.add_row(vec![
                Cell::new(&record.title),
                Cell::new(record.episodes.len()),
                Cell::new(format_watch_time(record.total_watch_time)),
                Cell::new(format_timestamp(record.last_watched)),
            ]);
        }
        output.println(table.to_string());
        output.info(format!(
            "{} series, {} episodes, {} watched",
            snapshot.anime.len(),
            snapshot.episode_count(),
            format_watch_time(snapshot.total_watch_time()),
        ));
    }

    if show_progress {
        let live: Vec<_> = snapshot
            .progress
            .iter()
            .filter(|(_, entry)| !entry.deleted)
            .collect();
        let tombstones = snapshot.progress.len() - live.len();

        if live.is_empty() {
            output.info("No in-flight positions");
        } else {
            let mut table = Table::new();
            table.load_preset(UTF8_FULL_CONDENSED);
            table.set_header(vec!["Episode", "Position", "%", "Saved"]);
            for (id, entry) in live {
                table.add_row(vec![
                    Cell::new(id),
                    Cell::new(format!(
                        "{} / {}",
                        format_watch_time(entry.current_time as u64),
                        format_watch_time(entry.duration as u64)
                    )),
                    Cell::new(entry.percentage),
                    Cell::new(format_timestamp(Some(entry.saved_at))),
                ]);
            }
            output.println(table.to_string());
        }
        if tombstones > 0 {
            output.info(format!("{} deleted entries awaiting propagation", tombstones));
        }
    }

    Ok(())
}

fn status_json(snapshot: &Snapshot, user_id: Option<&str>, show_progress: bool) -> Value {
    let mut value = json!({
        "type": "status",
        "user_id": user_id,
        "series": snapshot.anime.len(),
        "episodes": snapshot.episode_count(),
        "total_watch_time_secs": snapshot.total_watch_time(),
    });
    if show_progress {
        value["progress"] = serde_json::to_value(&snapshot.progress).unwrap_or_default();
    }
    value
}

pub(crate) fn format_watch_time(total_secs: u64) -> String {
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    if hours > 0 {
        format!("{}h {:02}m", hours, minutes)
    } else {
        format!("{}m", minutes)
    }
}

fn format_timestamp(timestamp: Option<DateTime<Utc>>) -> String {
    match timestamp {
        Some(ts) => ts.format("%Y-%m-%d %H:%M").to_string(),
        None => "-".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watch_time_formats_compactly() {
        assert_eq!(format_watch_time(0), "0m");
        assert_eq!(format_watch_time(59 * 60), "59m");
        assert_eq!(format_watch_time(3600), "1h 00m");
        assert_eq!(format_watch_time(2 * 3600 + 5 * 60), "2h 05m");
    }
}
