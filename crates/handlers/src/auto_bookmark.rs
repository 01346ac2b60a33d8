use async_trait::async_trait;
use serde_json::{json, Map, Value};
use skylink_core::host::KeyValueStore;
use skylink_core::Result;
use tracing::info;

use crate::{Handler, HandlerContext, HandlerSchema};

/// Key of the persisted on/off switch.
pub const AUTO_BOOKMARK_KEY: &str = "autoBookmarkEnabled";

/// Off unless explicitly enabled.
pub async fn is_enabled(storage: &dyn KeyValueStore) -> Result<bool> {
    let items = storage.get(&[AUTO_BOOKMARK_KEY]).await?;
    Ok(items
        .get(AUTO_BOOKMARK_KEY)
        .and_then(|v| v.as_bool())
        .unwrap_or(false))
}

pub async fn set_enabled(storage: &dyn KeyValueStore, enabled: bool) -> Result<()> {
    let mut items = Map::new();
    items.insert(AUTO_BOOKMARK_KEY.to_string(), Value::Bool(enabled));
    storage.set(items).await
}

pub struct AutoBookmarkStatusHandler;

#[async_trait]
impl Handler for AutoBookmarkStatusHandler {
    fn schema(&self) -> HandlerSchema {
        HandlerSchema {
            action: "auto-bookmark.status",
            capability: "autoBookmark",
            description: "Whether work-related pages are suggested as bookmarks.",
        }
    }

    fn validate(&self, _params: &Value) -> Result<()> {
        Ok(())
    }

    async fn execute(&self, ctx: HandlerContext, _params: Value) -> Result<Value> {
        let enabled = is_enabled(ctx.host.storage.as_ref()).await?;
        Ok(json!({ "enabled": enabled }))
    }
}

/// Serves both `auto-bookmark.enable` and `auto-bookmark.disable`.
pub struct AutoBookmarkToggleHandler {
    enable: bool,
}

impl AutoBookmarkToggleHandler {
    pub fn enable() -> Self {
        Self { enable: true }
    }

    pub fn disable() -> Self {
        Self { enable: false }
    }
}

#[async_trait]
impl Handler for AutoBookmarkToggleHandler {
    fn schema(&self) -> HandlerSchema {
        if self.enable {
            HandlerSchema {
                action: "auto-bookmark.enable",
                capability: "autoBookmark",
                description: "Start suggesting work-related pages as bookmarks.",
            }
        } else {
            HandlerSchema {
                action: "auto-bookmark.disable",
                capability: "autoBookmark",
                description: "Stop suggesting bookmarks.",
            }
        }
    }

    fn validate(&self, _params: &Value) -> Result<()> {
        Ok(())
    }

    async fn execute(&self, ctx: HandlerContext, _params: Value) -> Result<Value> {
        set_enabled(ctx.host.storage.as_ref(), self.enable).await?;
        info!(enabled = self.enable, "Auto-bookmarking toggled");
        Ok(json!({ "enabled": self.enable }))
    }
}
