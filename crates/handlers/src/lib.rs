pub mod auto_bookmark;
pub mod bookmarks;
pub mod debug;
pub mod registry;
pub mod sessions;
pub mod status;
pub mod tabs;

use async_trait::async_trait;
use serde_json::Value;
use skylink_core::host::{memory::MemoryBrowser, DebugEvent, Host};
use skylink_core::{ConnectionState, Error, Result, TabId};
use skylink_storage::SessionRegistry;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

pub use registry::{HandlerRegistry, BUILTIN_ACTIONS};

/// Everything a handler may touch while executing one command.
#[derive(Clone)]
pub struct HandlerContext {
    pub host: Host,
    pub sessions: Arc<SessionRegistry>,
    pub connection: watch::Receiver<ConnectionState>,
    pub version: String,
    /// Debugger subscriptions opened by handlers deliver here.
    pub debug_events: mpsc::UnboundedSender<DebugEvent>,
}

impl HandlerContext {
    pub fn connection_state(&self) -> ConnectionState {
        *self.connection.borrow()
    }

    /// Context over an in-memory browser, for tests and simulation.
    pub fn in_memory() -> (Self, MemoryBrowser, mpsc::UnboundedReceiver<DebugEvent>) {
        let (host, browser) = Host::in_memory();
        let (_, connection) = watch::channel(ConnectionState::Connected);
        let (debug_events, debug_rx) = mpsc::unbounded_channel();
        let ctx = Self {
            host,
            sessions: Arc::new(SessionRegistry::default()),
            connection,
            version: env!("CARGO_PKG_VERSION").to_string(),
            debug_events,
        };
        (ctx, browser, debug_rx)
    }
}

pub struct HandlerSchema {
    pub action: &'static str,
    /// Group announced in the hello frame.
    pub capability: &'static str,
    pub description: &'static str,
}

#[async_trait]
pub trait Handler: Send + Sync {
    fn schema(&self) -> HandlerSchema;
    fn validate(&self, params: &Value) -> Result<()>;
    async fn execute(&self, ctx: HandlerContext, params: Value) -> Result<Value>;
}

/// Non-empty string parameter.
pub(crate) fn str_param<'a>(params: &'a Value, key: &str) -> Option<&'a str> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
}

pub(crate) fn require_str<'a>(params: &'a Value, key: &str, message: &str) -> Result<&'a str> {
    str_param(params, key).ok_or_else(|| Error::Validation(message.to_string()))
}

/// Identifier given either as a string or as a number.
pub(crate) fn id_param(params: &Value, key: &str) -> Option<String> {
    match params.get(key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Tab id given as a number or a numeric string.
pub(crate) fn tab_id_param(params: &Value, key: &str) -> Option<TabId> {
    match params.get(key)? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

pub(crate) fn bool_param(params: &Value, key: &str) -> Option<bool> {
    params.get(key).and_then(|v| v.as_bool())
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use skylink_core::host::{DebugAttach, Subscription, TabEvent, TabInfo, TabQuery, TabStore, TabUpdate};
    use skylink_core::WindowId;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Tab store whose tabs all close right after the first listing is taken.
    pub struct ClosingTabs {
        inner: MemoryBrowser,
        closed: AtomicBool,
    }

    #[async_trait]
    impl TabStore for ClosingTabs {
        async fn query(&self, query: TabQuery) -> Result<Vec<TabInfo>> {
            let tabs = TabStore::query(&self.inner, query).await?;
            if !self.closed.swap(true, Ordering::SeqCst) {
                let ids: Vec<TabId> = tabs.iter().map(|t| t.id).collect();
                TabStore::remove(&self.inner, &ids).await?;
            }
            Ok(tabs)
        }

        async fn create(&self, url: Option<&str>, active: bool) -> Result<TabInfo> {
            TabStore::create(&self.inner, url, active).await
        }

        async fn remove(&self, ids: &[TabId]) -> Result<()> {
            TabStore::remove(&self.inner, ids).await
        }

        async fn update(&self, id: TabId, update: TabUpdate) -> Result<TabInfo> {
            self.inner.update(id, update).await
        }

        async fn focus_window(&self, window_id: WindowId) -> Result<()> {
            self.inner.focus_window(window_id).await
        }

        fn subscribe(&self, sink: mpsc::UnboundedSender<TabEvent>) -> Subscription {
            TabStore::subscribe(&self.inner, sink)
        }
    }

    /// Debugger that attaches, then loses the tab before the attach returns.
    pub struct ClosingDebugger {
        inner: MemoryBrowser,
    }

    #[async_trait]
    impl DebugAttach for ClosingDebugger {
        async fn attach(&self, tab_id: TabId) -> Result<()> {
            self.inner.attach(tab_id).await?;
            TabStore::remove(&self.inner, &[tab_id]).await
        }

        async fn detach(&self, tab_id: TabId) -> Result<()> {
            self.inner.detach(tab_id).await
        }

        async fn send_command(&self, tab_id: TabId, method: &str, params: Value) -> Result<Value> {
            self.inner.send_command(tab_id, method, params).await
        }

        fn subscribe(&self, tab_id: TabId, sink: mpsc::UnboundedSender<DebugEvent>) -> Subscription {
            DebugAttach::subscribe(&self.inner, tab_id, sink)
        }
    }

    pub fn context_with_closing_tabs() -> (HandlerContext, MemoryBrowser, mpsc::UnboundedReceiver<DebugEvent>) {
        let (mut ctx, browser, events) = HandlerContext::in_memory();
        ctx.host.tabs = Arc::new(ClosingTabs {
            inner: browser.clone(),
            closed: AtomicBool::new(false),
        });
        (ctx, browser, events)
    }

    pub fn context_with_closing_debugger() -> (HandlerContext, MemoryBrowser, mpsc::UnboundedReceiver<DebugEvent>) {
        let (mut ctx, browser, events) = HandlerContext::in_memory();
        ctx.host.debugger = Arc::new(ClosingDebugger {
            inner: browser.clone(),
        });
        (ctx, browser, events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_param_helpers() {
        let params = json!({"a": "x", "empty": "", "n": 5, "s": "12", "b": true});
        assert_eq!(str_param(&params, "a"), Some("x"));
        assert_eq!(str_param(&params, "empty"), None);
        assert_eq!(id_param(&params, "n").as_deref(), Some("5"));
        assert_eq!(tab_id_param(&params, "s"), Some(12));
        assert_eq!(tab_id_param(&params, "a"), None);
        assert_eq!(bool_param(&params, "b"), Some(true));
        assert_eq!(
            require_str(&params, "missing", "Thing required").unwrap_err().to_string(),
            "Thing required"
        );
    }
}
