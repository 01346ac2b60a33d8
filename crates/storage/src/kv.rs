use async_trait::async_trait;
use serde_json::{Map, Value};
use skylink_core::host::KeyValueStore;
use skylink_core::{Error, Result};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Key-value store persisted as a single JSON object on disk.
///
/// Every write rewrites the whole file through a temporary sibling and a rename,
/// so readers never observe a half-written document.
pub struct FileKvStore {
    path: PathBuf,
    items: Mutex<Map<String, Value>>,
}

impl FileKvStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let items = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            if content.trim().is_empty() {
                Map::new()
            } else {
                match serde_json::from_str::<Value>(&content) {
                    Ok(Value::Object(map)) => map,
                    Ok(_) => {
                        return Err(Error::Storage(format!(
                            "{} does not contain a JSON object",
                            path.display()
                        )))
                    }
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "Corrupt store file, starting empty");
                        Map::new()
                    }
                }
            }
        } else {
            Map::new()
        };
        debug!(path = %path.display(), keys = items.len(), "Opened key-value store");
        Ok(Self {
            path,
            items: Mutex::new(items),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn flush(&self, items: &Map<String, Value>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let content = serde_json::to_string_pretty(items)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, content).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &self.path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(Error::Storage(format!(
                "Failed to replace {}: {}",
                self.path.display(),
                e
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for FileKvStore {
    async fn get(&self, keys: &[&str]) -> Result<Map<String, Value>> {
        let items = self.items.lock().await;
        Ok(keys
            .iter()
            .filter_map(|k| items.get(*k).map(|v| (k.to_string(), v.clone())))
            .collect())
    }

    async fn set(&self, updates: Map<String, Value>) -> Result<()> {
        let mut items = self.items.lock().await;
        let mut next = items.clone();
        for (key, value) in updates {
            next.insert(key, value);
        }
        self.flush(&next).await?;
        *items = next;
        Ok(())
    }

    async fn remove(&self, keys: &[&str]) -> Result<()> {
        let mut items = self.items.lock().await;
        let mut next = items.clone();
        let mut changed = false;
        for key in keys {
            changed |= next.remove(*key).is_some();
        }
        if changed {
            self.flush(&next).await?;
            *items = next;
        }
        Ok(())
    }
}
