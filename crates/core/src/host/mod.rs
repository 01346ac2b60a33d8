//! Browser capabilities the bridge drives but does not own.
//!
//! Each store mirrors one browser API surface. Event sources hand back a
//! [`Subscription`]; dropping it detaches the listener.

pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::types::{TabId, WindowId};

/// Node of the bookmark tree. Folders have no `url`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookmarkNode {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<u32>,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_added: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<BookmarkNode>>,
}

impl BookmarkNode {
    pub fn is_folder(&self) -> bool {
        self.url.is_none()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BookmarkQuery {
    /// Free text matched against titles and URLs.
    Text(String),
    /// Exact title match.
    Title(String),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewBookmark {
    pub parent_id: Option<String>,
    pub title: String,
    /// `None` creates a folder.
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BookmarkDestination {
    pub parent_id: Option<String>,
    pub index: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabInfo {
    pub id: TabId,
    pub window_id: WindowId,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub pinned: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fav_icon_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TabQuery {
    pub active: Option<bool>,
    pub window_id: Option<WindowId>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TabUpdate {
    pub active: Option<bool>,
    pub pinned: Option<bool>,
    pub url: Option<String>,
}

/// Fields that changed in a tab update notification.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabChange {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TabEvent {
    Created(TabInfo),
    Updated { tab_id: TabId, change: TabChange },
    Activated { tab_id: TabId, window_id: WindowId },
    Removed { tab_id: TabId, window_closing: bool },
}

impl TabEvent {
    pub fn tab_id(&self) -> TabId {
        match self {
            TabEvent::Created(tab) => tab.id,
            TabEvent::Updated { tab_id, .. }
            | TabEvent::Activated { tab_id, .. }
            | TabEvent::Removed { tab_id, .. } => *tab_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DebugEvent {
    /// A DevTools protocol notification, e.g. `Runtime.consoleAPICalled`.
    Protocol {
        tab_id: TabId,
        method: String,
        params: Value,
    },
    /// The browser dropped the debugger (tab closed, user cancelled, ...).
    Detached { tab_id: TabId, reason: String },
}

impl DebugEvent {
    pub fn tab_id(&self) -> TabId {
        match self {
            DebugEvent::Protocol { tab_id, .. } | DebugEvent::Detached { tab_id, .. } => *tab_id,
        }
    }
}

/// Listener registration. Dropping the handle unsubscribes.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// A handle with nothing to release.
    pub fn noop() -> Self {
        Self { cancel: None }
    }

    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

#[async_trait]
pub trait BookmarkStore: Send + Sync {
    async fn get_tree(&self) -> Result<Vec<BookmarkNode>>;
    async fn search(&self, query: BookmarkQuery) -> Result<Vec<BookmarkNode>>;
    async fn create(&self, bookmark: NewBookmark) -> Result<BookmarkNode>;
    async fn remove(&self, id: &str) -> Result<()>;
    async fn move_node(&self, id: &str, destination: BookmarkDestination) -> Result<BookmarkNode>;
}

#[async_trait]
pub trait TabStore: Send + Sync {
    async fn query(&self, query: TabQuery) -> Result<Vec<TabInfo>>;
    async fn create(&self, url: Option<&str>, active: bool) -> Result<TabInfo>;
    async fn remove(&self, ids: &[TabId]) -> Result<()>;
    async fn update(&self, id: TabId, update: TabUpdate) -> Result<TabInfo>;
    async fn focus_window(&self, window_id: WindowId) -> Result<()>;
    /// Deliver tab lifecycle notifications to `sink` until the handle is dropped.
    fn subscribe(&self, sink: mpsc::UnboundedSender<TabEvent>) -> Subscription;
}

#[async_trait]
pub trait DebugAttach: Send + Sync {
    async fn attach(&self, tab_id: TabId) -> Result<()>;
    async fn detach(&self, tab_id: TabId) -> Result<()>;
    async fn send_command(&self, tab_id: TabId, method: &str, params: Value) -> Result<Value>;
    /// Deliver protocol events for `tab_id` to `sink` until the handle is dropped.
    fn subscribe(&self, tab_id: TabId, sink: mpsc::UnboundedSender<DebugEvent>) -> Subscription;
}

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Returns only the keys that are present.
    async fn get(&self, keys: &[&str]) -> Result<Map<String, Value>>;
    async fn set(&self, items: Map<String, Value>) -> Result<()>;
    async fn remove(&self, keys: &[&str]) -> Result<()>;
}

/// Everything the bridge needs from the browser, bundled for handlers.
#[derive(Clone)]
pub struct Host {
    pub bookmarks: Arc<dyn BookmarkStore>,
    pub tabs: Arc<dyn TabStore>,
    pub debugger: Arc<dyn DebugAttach>,
    pub storage: Arc<dyn KeyValueStore>,
}

impl Host {
    /// In-process browser backed by [`memory::MemoryBrowser`].
    pub fn in_memory() -> (Self, memory::MemoryBrowser) {
        let browser = memory::MemoryBrowser::new();
        let host = Self {
            bookmarks: Arc::new(browser.clone()),
            tabs: Arc::new(browser.clone()),
            debugger: Arc::new(browser.clone()),
            storage: Arc::new(memory::MemoryKvStore::new()),
        };
        (host, browser)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_subscription_cancels_once_on_drop() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let sub = Subscription::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        drop(sub);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_explicit_unsubscribe_does_not_double_cancel() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        Subscription::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unsubscribe();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        drop(Subscription::noop());
    }

    #[test]
    fn test_bookmark_node_wire_shape() {
        let node = BookmarkNode {
            id: "5".into(),
            parent_id: Some("1".into()),
            index: Some(0),
            title: "Docs".into(),
            url: Some("https://docs.rs".into()),
            date_added: Some(10),
            children: None,
        };
        let value = serde_json::to_value(&node).unwrap();
        assert_eq!(value["parentId"], "1");
        assert_eq!(value["dateAdded"], 10);
        assert!(value.get("children").is_none());
        assert!(!node.is_folder());
    }
}
