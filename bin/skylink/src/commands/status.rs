use skylink_core::Paths;
use skylink_handlers::auto_bookmark;

use super::{load_config, open_storage};
use std::path::PathBuf;

pub async fn run(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let paths = Paths::new();

    println!("skylink status");
    println!("==============");
    println!();

    let shown_path = config_path.clone().unwrap_or_else(|| paths.config_file());
    println!(
        "Config:    {} {}",
        shown_path.display(),
        if shown_path.exists() { "✓" } else { "✗ (using defaults)" }
    );
    let config = load_config(&paths, config_path)?;

    println!("Gateway:   {}", config.gateway.url);
    println!("Heartbeat: every {}s", config.heartbeat_interval_secs);
    println!(
        "Reconnect: {}s{}",
        config.reconnect.delay_secs,
        if config.reconnect.backoff {
            format!(" doubling up to {}s", config.reconnect.max_delay_secs)
        } else {
            String::new()
        }
    );
    println!("Version:   {}", config.extension.version);
    println!();

    let storage = open_storage(&paths)?;
    println!("Storage:   {}", storage.path().display());
    let enabled = auto_bookmark::is_enabled(&storage).await?;
    println!(
        "Auto-bookmark: {}",
        if enabled { "enabled" } else { "disabled" }
    );

    Ok(())
}
