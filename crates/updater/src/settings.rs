use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use skylink_core::host::KeyValueStore;
use skylink_core::Result;
use tracing::warn;

/// Key the settings are persisted under.
pub const UPDATE_SETTINGS_KEY: &str = "skynetUpdateSettings";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSettings {
    #[serde(default = "default_true")]
    pub auto_check: bool,
    #[serde(default)]
    pub auto_download: bool,
    #[serde(default)]
    pub auto_install: bool,
    /// Minutes between background checks.
    #[serde(default = "default_check_interval")]
    pub check_interval: u64,
    #[serde(default = "default_true")]
    pub notify_updates: bool,
    #[serde(default)]
    pub include_prereleases: bool,
    #[serde(default = "default_true")]
    pub backup_before_update: bool,
}

fn default_true() -> bool {
    true
}

fn default_check_interval() -> u64 {
    30
}

impl Default for UpdateSettings {
    fn default() -> Self {
        Self {
            auto_check: true,
            auto_download: false,
            auto_install: false,
            check_interval: default_check_interval(),
            notify_updates: true,
            include_prereleases: false,
            backup_before_update: true,
        }
    }
}

impl UpdateSettings {
    /// Stored settings, or the defaults when nothing usable is stored.
    pub async fn load(store: &dyn KeyValueStore) -> Result<Self> {
        let items = store.get(&[UPDATE_SETTINGS_KEY]).await?;
        let Some(raw) = items.get(UPDATE_SETTINGS_KEY) else {
            return Ok(Self::default());
        };
        match serde_json::from_value(raw.clone()) {
            Ok(settings) => Ok(settings),
            Err(e) => {
                warn!(error = %e, "Ignoring unreadable update settings");
                Ok(Self::default())
            }
        }
    }

    pub async fn save(&self, store: &dyn KeyValueStore) -> Result<()> {
        let mut items = Map::new();
        items.insert(UPDATE_SETTINGS_KEY.to_string(), serde_json::to_value(self)?);
        store.set(items).await
    }

    /// Shallow merge of `patch` over these settings. Unknown keys are ignored.
    pub fn merged(&self, patch: &Value) -> Result<Self> {
        let mut current = serde_json::to_value(self)?;
        if let (Value::Object(base), Value::Object(patch)) = (&mut current, patch) {
            for (key, value) in patch {
                if base.contains_key(key) {
                    base.insert(key.clone(), value.clone());
                }
            }
        }
        Ok(serde_json::from_value(current)?)
    }
}
