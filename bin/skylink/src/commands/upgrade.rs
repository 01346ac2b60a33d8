use skylink_core::Paths;
use skylink_updater::{UpdateDecision, UpdateManager, UpdateSettings};
use std::path::PathBuf;

use super::{load_config, open_storage};

pub async fn check(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let paths = Paths::new();
    let config = load_config(&paths, config_path)?;
    let storage = open_storage(&paths)?;
    let settings = UpdateSettings::load(&storage).await?;
    let manager = UpdateManager::new(&config)?;

    println!("Checking for updates (current {})...", manager.current_version());

    match manager.check(&settings).await {
        Ok(UpdateDecision::Available(update)) => {
            println!("Update available!");
            println!("  Version: {}", update.version);
            if let Some(title) = &update.release_title {
                println!("  Title:   {}", title);
            }
            if let Some(date) = update.release_date {
                println!("  Published: {}", date.format("%Y-%m-%d"));
            }
            println!("  Size:    {}", update.size);
            if let Some(url) = &update.download_url {
                println!("  Download: {}", url);
            }
        }
        Ok(UpdateDecision::PrereleaseSkipped { version }) => {
            println!("Prerelease {} available; prereleases are disabled.", version);
        }
        Ok(UpdateDecision::UpToDate) => {
            println!("Extension is up to date.");
        }
        Err(e) => {
            println!("Failed to check for updates: {}", e);
        }
    }

    Ok(())
}

pub async fn status(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let paths = Paths::new();
    let config = load_config(&paths, config_path)?;
    let storage = open_storage(&paths)?;
    let settings = UpdateSettings::load(&storage).await?;

    println!("Current version: {}", config.extension.version);
    if config.updates.release_url.is_empty() {
        println!("Release URL:     (not configured)");
    } else {
        println!("Release URL:     {}", config.updates.release_url);
    }
    println!("{}", serde_json::to_string_pretty(&settings)?);
    Ok(())
}
