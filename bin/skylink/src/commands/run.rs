use skylink_core::host::memory::MemoryBrowser;
use skylink_core::host::{BookmarkStore, Host, NewBookmark};
use skylink_core::Paths;
use skylink_service::BridgeService;
use skylink_transport::WsConnector;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use super::{load_config, open_storage};

const SAMPLE_TABS: &[(&str, &str)] = &[
    ("https://docs.rs/tokio", "tokio - Rust"),
    ("https://docs.rs/serde", "serde - Rust"),
    ("https://github.com", "GitHub"),
    ("chrome://extensions", "Extensions"),
];

const SAMPLE_BOOKMARKS: &[(&str, &str)] = &[
    ("Rust", "https://www.rust-lang.org/"),
    ("Rust (again)", "https://www.rust-lang.org"),
    ("crates.io", "https://crates.io/"),
];

async fn seed(browser: &MemoryBrowser) -> anyhow::Result<()> {
    for (url, title) in SAMPLE_TABS {
        browser.seed_tab(url, title);
    }
    for (title, url) in SAMPLE_BOOKMARKS {
        browser
            .create(NewBookmark {
                parent_id: Some("1".to_string()),
                title: title.to_string(),
                url: Some(url.to_string()),
            })
            .await?;
    }
    Ok(())
}

pub async fn run(
    config_path: Option<PathBuf>,
    gateway: Option<String>,
    simulate: bool,
) -> anyhow::Result<()> {
    let paths = Paths::new();
    let mut config = load_config(&paths, config_path)?;
    if let Some(url) = gateway {
        config.gateway.url = url;
    }
    config.validate()?;

    let storage = open_storage(&paths)?;
    info!(path = %storage.path().display(), "Using key-value store");

    let browser = MemoryBrowser::new();
    if simulate {
        seed(&browser).await?;
        info!(tabs = SAMPLE_TABS.len(), bookmarks = SAMPLE_BOOKMARKS.len(), "Seeded simulated browser");
    }
    let host = Host {
        bookmarks: Arc::new(browser.clone()),
        tabs: Arc::new(browser.clone()),
        debugger: Arc::new(browser),
        storage: Arc::new(storage),
    };

    let service = BridgeService::new(config, host, Arc::new(WsConnector))?;
    service.start().await?;
    info!("Skylink running, press Ctrl-C to stop");

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl-C");
    }
    info!("Shutting down");
    service.stop().await;
    Ok(())
}
