use crate::output::Output;
use anime_sync_config::PathManager;
use color_eyre::Result;
use std::fs;

pub async fn run_clear(all: bool, data: bool, credentials: bool, output: &Output) -> Result<()> {
    let paths = PathManager::default();

    if all {
        clear_data(&paths, output)?;
        clear_credentials(&paths, output)?;
        output.success("All local data and credentials cleared");
        return Ok(());
    }

    let mut cleared_anything = false;

    if data {
        clear_data(&paths, output)?;
        cleared_anything = true;
    }

    if credentials {
        clear_credentials(&paths, output)?;
        cleared_anything = true;
    }

    if !cleared_anything {
        output.warn("No clear option specified. Use --data, --credentials, or --all");
        output.println("\nExample: anitrack clear --data");
    }

    Ok(())
}

fn clear_data(paths: &PathManager, output: &Output) -> Result<()> {
    let store_file = paths.store_file();

    if store_file.exists() {
        fs::remove_file(&store_file).map_err(|e| {
            color_eyre::eyre::eyre!("Failed to remove store at {}: {}", store_file.display(), e)
        })?;
        output.success(format!("Cleared local watch history: {}", store_file.display()));
    } else {
        output.info("No local watch history found to clear");
    }

    Ok(())
}

fn clear_credentials(paths: &PathManager, output: &Output) -> Result<()> {
    let credentials_file = paths.credentials_file();

    if credentials_file.exists() {
        fs::remove_file(&credentials_file).map_err(|e| {
            color_eyre::eyre::eyre!(
                "Failed to remove credentials file at {}: {}",
                credentials_file.display(),
                e
            )
        })?;
        output.success(format!("Cleared credentials: {}", credentials_file.display()));
    } else {
        output.info("No credentials file found to clear");
    }

    Ok(())
}
