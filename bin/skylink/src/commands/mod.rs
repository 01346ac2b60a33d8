pub mod run;
pub mod status;
pub mod upgrade;

use skylink_core::{Config, Paths};
use skylink_storage::FileKvStore;
use std::path::PathBuf;

/// Config from `--config`, else `~/.skylink/config.json`, else defaults.
pub fn load_config(paths: &Paths, config_path: Option<PathBuf>) -> anyhow::Result<Config> {
    let config = match config_path {
        Some(path) => Config::load(&path)?,
        None => Config::load_or_default(paths)?,
    };
    Ok(config)
}

pub fn open_storage(paths: &Paths) -> anyhow::Result<FileKvStore> {
    Ok(FileKvStore::open(paths.storage_file())?)
}
