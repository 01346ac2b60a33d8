//! In-process browser used by tests and the `--simulate` mode of the binary.
//!
//! Behaves like the real extension APIs where it matters to the bridge:
//! numeric tab ids, a bookmark tree rooted at `"0"` with the bookmarks bar at
//! `"1"`, one debugger per tab, and lifecycle notifications for every change.

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;

use super::{
    BookmarkDestination, BookmarkNode, BookmarkQuery, BookmarkStore, DebugAttach, DebugEvent,
    KeyValueStore, NewBookmark, Subscription, TabChange, TabEvent, TabInfo, TabQuery, TabStore,
    TabUpdate,
};
use crate::error::{Error, Result};
use crate::types::{now_ms, TabId, WindowId};

#[derive(Debug, Clone)]
struct StoredBookmark {
    parent_id: Option<String>,
    title: String,
    url: Option<String>,
    date_added: i64,
    children: Vec<String>,
}

#[derive(Default)]
struct BrowserState {
    bookmarks: HashMap<String, StoredBookmark>,
    next_bookmark_id: u64,
    tabs: Vec<TabInfo>,
    next_tab_id: TabId,
    focused_window: Option<WindowId>,
    next_listener_id: u64,
    tab_listeners: HashMap<u64, mpsc::UnboundedSender<TabEvent>>,
    debug_listeners: HashMap<u64, (TabId, mpsc::UnboundedSender<DebugEvent>)>,
    attached: HashSet<TabId>,
    command_results: HashMap<String, Value>,
    command_log: Vec<(TabId, String, Value)>,
}

impl BrowserState {
    fn seeded() -> Self {
        let mut state = Self {
            next_bookmark_id: 3,
            next_tab_id: 1,
            ..Default::default()
        };
        let now = now_ms();
        state.bookmarks.insert(
            "0".to_string(),
            StoredBookmark {
                parent_id: None,
                title: String::new(),
                url: None,
                date_added: now,
                children: vec!["1".to_string(), "2".to_string()],
            },
        );
        for (id, title) in [("1", "Bookmarks bar"), ("2", "Other bookmarks")] {
            state.bookmarks.insert(
                id.to_string(),
                StoredBookmark {
                    parent_id: Some("0".to_string()),
                    title: title.to_string(),
                    url: None,
                    date_added: now,
                    children: Vec::new(),
                },
            );
        }
        state
    }

    fn node(&self, id: &str, recursive: bool) -> Option<BookmarkNode> {
        let stored = self.bookmarks.get(id)?;
        let index = stored.parent_id.as_ref().and_then(|parent| {
            self.bookmarks
                .get(parent)
                .and_then(|p| p.children.iter().position(|c| c == id))
                .map(|i| i as u32)
        });
        let children = if stored.url.is_some() {
            None
        } else if recursive {
            Some(
                stored
                    .children
                    .iter()
                    .filter_map(|child| self.node(child, true))
                    .collect(),
            )
        } else {
            None
        };
        Some(BookmarkNode {
            id: id.to_string(),
            parent_id: stored.parent_id.clone(),
            index,
            title: stored.title.clone(),
            url: stored.url.clone(),
            date_added: Some(stored.date_added),
            children,
        })
    }

    fn emit_tab(&mut self, event: TabEvent) {
        self.tab_listeners
            .retain(|_, sink| sink.send(event.clone()).is_ok());
    }

    fn emit_debug(&mut self, event: DebugEvent) {
        let tab_id = event.tab_id();
        self.debug_listeners.retain(|_, (tab, sink)| {
            if *tab != tab_id {
                return true;
            }
            sink.send(event.clone()).is_ok()
        });
    }

    fn tab_mut(&mut self, id: TabId) -> Result<&mut TabInfo> {
        self.tabs
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| Error::Host(format!("No tab with id: {}", id)))
    }

    fn is_descendant(&self, candidate: &str, ancestor: &str) -> bool {
        let mut current = Some(candidate.to_string());
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.bookmarks.get(&id).and_then(|b| b.parent_id.clone());
        }
        false
    }
}

/// Cheap to clone; all clones share one browser.
#[derive(Clone)]
pub struct MemoryBrowser {
    state: Arc<Mutex<BrowserState>>,
}

impl MemoryBrowser {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(BrowserState::seeded())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BrowserState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Insert a tab without raising a `Created` notification.
    pub fn seed_tab(&self, url: &str, title: &str) -> TabId {
        let mut state = self.lock();
        let id = state.next_tab_id;
        state.next_tab_id += 1;
        state.tabs.push(TabInfo {
            id,
            window_id: 1,
            title: title.to_string(),
            url: url.to_string(),
            active: false,
            pinned: false,
            fav_icon_url: None,
            status: Some("complete".to_string()),
        });
        id
    }

    /// Simulate the page in `tab_id` changing.
    pub fn navigate(&self, tab_id: TabId, url: &str, title: &str) -> Result<()> {
        let mut state = self.lock();
        let tab = state.tab_mut(tab_id)?;
        tab.url = url.to_string();
        tab.title = title.to_string();
        let change = TabChange {
            url: Some(url.to_string()),
            title: Some(title.to_string()),
            status: Some("complete".to_string()),
        };
        state.emit_tab(TabEvent::Updated { tab_id, change });
        Ok(())
    }

    /// Raise a protocol event as the debugger would.
    pub fn emit_protocol_event(&self, tab_id: TabId, method: &str, params: Value) {
        self.lock().emit_debug(DebugEvent::Protocol {
            tab_id,
            method: method.to_string(),
            params,
        });
    }

    /// Simulate the browser dropping the debugger from a tab.
    pub fn force_detach(&self, tab_id: TabId, reason: &str) {
        let mut state = self.lock();
        if state.attached.remove(&tab_id) {
            state.emit_debug(DebugEvent::Detached {
                tab_id,
                reason: reason.to_string(),
            });
        }
    }

    /// Fixed result for every `send_command` call with `method`.
    pub fn set_command_result(&self, method: &str, result: Value) {
        self.lock()
            .command_results
            .insert(method.to_string(), result);
    }

    pub fn command_log(&self) -> Vec<(TabId, String, Value)> {
        self.lock().command_log.clone()
    }

    pub fn is_attached(&self, tab_id: TabId) -> bool {
        self.lock().attached.contains(&tab_id)
    }

    pub fn focused_window(&self) -> Option<WindowId> {
        self.lock().focused_window
    }

    pub fn tab_listener_count(&self) -> usize {
        self.lock().tab_listeners.len()
    }

    pub fn debug_listener_count(&self) -> usize {
        self.lock().debug_listeners.len()
    }
}

impl Default for MemoryBrowser {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BookmarkStore for MemoryBrowser {
    async fn get_tree(&self) -> Result<Vec<BookmarkNode>> {
        let state = self.lock();
        Ok(state.node("0", true).into_iter().collect())
    }

    async fn search(&self, query: BookmarkQuery) -> Result<Vec<BookmarkNode>> {
        let state = self.lock();
        let mut ids: Vec<&String> = state
            .bookmarks
            .iter()
            .filter(|(id, b)| {
                if id.as_str() == "0" {
                    return false;
                }
                match &query {
                    BookmarkQuery::Title(title) => &b.title == title,
                    BookmarkQuery::Text(text) => {
                        let needle = text.to_lowercase();
                        b.url.is_some()
                            && (b.title.to_lowercase().contains(&needle)
                                || b.url
                                    .as_deref()
                                    .map(|u| u.to_lowercase().contains(&needle))
                                    .unwrap_or(false))
                    }
                }
            })
            .map(|(id, _)| id)
            .collect();
        ids.sort_by_key(|id| id.parse::<u64>().unwrap_or(u64::MAX));
        Ok(ids
            .into_iter()
            .filter_map(|id| state.node(id, false))
            .collect())
    }

    async fn create(&self, bookmark: NewBookmark) -> Result<BookmarkNode> {
        let mut state = self.lock();
        let parent_id = bookmark.parent_id.unwrap_or_else(|| "2".to_string());
        match state.bookmarks.get(&parent_id) {
            Some(parent) if parent.url.is_none() => {}
            Some(_) => {
                return Err(Error::Host(format!(
                    "Parent {} is not a folder",
                    parent_id
                )))
            }
            None => return Err(Error::Host("Can't find parent bookmark for id.".to_string())),
        }
        let id = state.next_bookmark_id.to_string();
        state.next_bookmark_id += 1;
        state.bookmarks.insert(
            id.clone(),
            StoredBookmark {
                parent_id: Some(parent_id.clone()),
                title: bookmark.title,
                url: bookmark.url,
                date_added: now_ms(),
                children: Vec::new(),
            },
        );
        if let Some(parent) = state.bookmarks.get_mut(&parent_id) {
            parent.children.push(id.clone());
        }
        state
            .node(&id, false)
            .ok_or_else(|| Error::Host("Bookmark vanished after create".to_string()))
    }

    async fn remove(&self, id: &str) -> Result<()> {
        let mut state = self.lock();
        if matches!(id, "0" | "1" | "2") {
            return Err(Error::Host("Can't modify the root bookmark folders.".to_string()));
        }
        let stored = state
            .bookmarks
            .get(id)
            .cloned()
            .ok_or_else(|| Error::Host("Can't find bookmark for id.".to_string()))?;
        if !stored.children.is_empty() {
            return Err(Error::Host("Can't remove non-empty folder.".to_string()));
        }
        state.bookmarks.remove(id);
        if let Some(parent) = stored
            .parent_id
            .as_ref()
            .and_then(|p| state.bookmarks.get_mut(p))
        {
            parent.children.retain(|c| c != id);
        }
        Ok(())
    }

    async fn move_node(&self, id: &str, destination: BookmarkDestination) -> Result<BookmarkNode> {
        let mut state = self.lock();
        let stored = state
            .bookmarks
            .get(id)
            .cloned()
            .ok_or_else(|| Error::Host("Can't find bookmark for id.".to_string()))?;
        let old_parent = stored
            .parent_id
            .clone()
            .ok_or_else(|| Error::Host("Can't modify the root bookmark folders.".to_string()))?;
        let new_parent = destination.parent_id.unwrap_or_else(|| old_parent.clone());
        match state.bookmarks.get(&new_parent) {
            Some(p) if p.url.is_none() => {}
            _ => return Err(Error::Host("Can't find parent bookmark for id.".to_string())),
        }
        if state.is_descendant(&new_parent, id) {
            return Err(Error::Host("Can't move a folder into itself.".to_string()));
        }

        if let Some(parent) = state.bookmarks.get_mut(&old_parent) {
            parent.children.retain(|c| c != id);
        }
        if let Some(parent) = state.bookmarks.get_mut(&new_parent) {
            let at = destination
                .index
                .map(|i| (i as usize).min(parent.children.len()))
                .unwrap_or(parent.children.len());
            parent.children.insert(at, id.to_string());
        }
        if let Some(node) = state.bookmarks.get_mut(id) {
            node.parent_id = Some(new_parent);
        }
        state
            .node(id, false)
            .ok_or_else(|| Error::Host("Bookmark vanished after move".to_string()))
    }
}

#[async_trait]
impl TabStore for MemoryBrowser {
    async fn query(&self, query: TabQuery) -> Result<Vec<TabInfo>> {
        let state = self.lock();
        Ok(state
            .tabs
            .iter()
            .filter(|t| query.active.map_or(true, |a| t.active == a))
            .filter(|t| query.window_id.map_or(true, |w| t.window_id == w))
            .cloned()
            .collect())
    }

    async fn create(&self, url: Option<&str>, active: bool) -> Result<TabInfo> {
        let mut state = self.lock();
        let id = state.next_tab_id;
        state.next_tab_id += 1;
        if active {
            for tab in state.tabs.iter_mut().filter(|t| t.window_id == 1) {
                tab.active = false;
            }
        }
        let tab = TabInfo {
            id,
            window_id: 1,
            title: String::new(),
            url: url.unwrap_or("chrome://newtab/").to_string(),
            active,
            pinned: false,
            fav_icon_url: None,
            status: Some("loading".to_string()),
        };
        state.tabs.push(tab.clone());
        state.emit_tab(TabEvent::Created(tab.clone()));
        Ok(tab)
    }

    async fn remove(&self, ids: &[TabId]) -> Result<()> {
        let mut state = self.lock();
        if let Some(missing) = ids.iter().find(|id| !state.tabs.iter().any(|t| t.id == **id)) {
            return Err(Error::Host(format!("No tab with id: {}", missing)));
        }
        for id in ids {
            state.tabs.retain(|t| t.id != *id);
            if state.attached.remove(id) {
                state.emit_debug(DebugEvent::Detached {
                    tab_id: *id,
                    reason: "target_closed".to_string(),
                });
            }
            state.emit_tab(TabEvent::Removed {
                tab_id: *id,
                window_closing: false,
            });
        }
        Ok(())
    }

    async fn update(&self, id: TabId, update: TabUpdate) -> Result<TabInfo> {
        let mut state = self.lock();
        let window_id = state.tab_mut(id)?.window_id;
        if update.active == Some(true) {
            for tab in state.tabs.iter_mut().filter(|t| t.window_id == window_id) {
                tab.active = false;
            }
        }
        let tab = state.tab_mut(id)?;
        if let Some(active) = update.active {
            tab.active = active;
        }
        if let Some(pinned) = update.pinned {
            tab.pinned = pinned;
        }
        let mut change = TabChange::default();
        if let Some(url) = update.url {
            tab.url = url.clone();
            change.url = Some(url);
        }
        let updated = tab.clone();
        if update.active == Some(true) {
            state.emit_tab(TabEvent::Activated {
                tab_id: id,
                window_id,
            });
        }
        if change != TabChange::default() {
            state.emit_tab(TabEvent::Updated { tab_id: id, change });
        }
        Ok(updated)
    }

    async fn focus_window(&self, window_id: WindowId) -> Result<()> {
        let mut state = self.lock();
        if !state.tabs.iter().any(|t| t.window_id == window_id) {
            return Err(Error::Host(format!("No window with id: {}", window_id)));
        }
        state.focused_window = Some(window_id);
        Ok(())
    }

    fn subscribe(&self, sink: mpsc::UnboundedSender<TabEvent>) -> Subscription {
        let id = {
            let mut state = self.lock();
            let id = state.next_listener_id;
            state.next_listener_id += 1;
            state.tab_listeners.insert(id, sink);
            id
        };
        let weak = Arc::downgrade(&self.state);
        Subscription::new(move || {
            if let Some(state) = weak.upgrade() {
                if let Ok(mut state) = state.lock() {
                    state.tab_listeners.remove(&id);
                }
            }
        })
    }
}

#[async_trait]
impl DebugAttach for MemoryBrowser {
    async fn attach(&self, tab_id: TabId) -> Result<()> {
        let mut state = self.lock();
        state.tab_mut(tab_id)?;
        if !state.attached.insert(tab_id) {
            return Err(Error::Host(format!(
                "Another debugger is already attached to the tab with id: {}.",
                tab_id
            )));
        }
        Ok(())
    }

    async fn detach(&self, tab_id: TabId) -> Result<()> {
        let mut state = self.lock();
        if !state.attached.remove(&tab_id) {
            return Err(Error::Host(format!(
                "Debugger is not attached to the tab with id: {}.",
                tab_id
            )));
        }
        Ok(())
    }

    async fn send_command(&self, tab_id: TabId, method: &str, params: Value) -> Result<Value> {
        let mut state = self.lock();
        if !state.attached.contains(&tab_id) {
            return Err(Error::Host(format!(
                "Debugger is not attached to the tab with id: {}.",
                tab_id
            )));
        }
        state
            .command_log
            .push((tab_id, method.to_string(), params.clone()));
        if let Some(result) = state.command_results.get(method) {
            return Ok(result.clone());
        }
        Ok(match method {
            "Runtime.evaluate" => json!({
                "result": {
                    "type": "string",
                    "value": params.get("expression").cloned().unwrap_or(Value::Null),
                }
            }),
            "Page.addScriptToEvaluateOnNewDocument" => {
                json!({ "identifier": state.command_log.len().to_string() })
            }
            _ => json!({}),
        })
    }

    fn subscribe(&self, tab_id: TabId, sink: mpsc::UnboundedSender<DebugEvent>) -> Subscription {
        let id = {
            let mut state = self.lock();
            let id = state.next_listener_id;
            state.next_listener_id += 1;
            state.debug_listeners.insert(id, (tab_id, sink));
            id
        };
        let weak = Arc::downgrade(&self.state);
        Subscription::new(move || {
            if let Some(state) = weak.upgrade() {
                if let Ok(mut state) = state.lock() {
                    state.debug_listeners.remove(&id);
                }
            }
        })
    }
}

/// `KeyValueStore` that forgets everything on drop.
#[derive(Clone, Default)]
pub struct MemoryKvStore {
    items: Arc<Mutex<Map<String, Value>>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryKvStore {
    async fn get(&self, keys: &[&str]) -> Result<Map<String, Value>> {
        let items = self.items.lock().unwrap_or_else(|p| p.into_inner());
        Ok(keys
            .iter()
            .filter_map(|k| items.get(*k).map(|v| (k.to_string(), v.clone())))
            .collect())
    }

    async fn set(&self, items: Map<String, Value>) -> Result<()> {
        let mut stored = self.items.lock().unwrap_or_else(|p| p.into_inner());
        for (key, value) in items {
            stored.insert(key, value);
        }
        Ok(())
    }

    async fn remove(&self, keys: &[&str]) -> Result<()> {
        let mut stored = self.items.lock().unwrap_or_else(|p| p.into_inner());
        for key in keys {
            stored.remove(*key);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bookmark_tree_round() {
        let browser = MemoryBrowser::new();
        let folder = BookmarkStore::create(
            &browser,
            NewBookmark {
                parent_id: Some("1".into()),
                title: "Work".into(),
                url: None,
            },
        )
        .await
        .unwrap();
        let page = BookmarkStore::create(
            &browser,
            NewBookmark {
                parent_id: Some(folder.id.clone()),
                title: "Rust".into(),
                url: Some("https://rust-lang.org".into()),
            },
        )
        .await
        .unwrap();

        let tree = browser.get_tree().await.unwrap();
        let bar = &tree[0].children.as_ref().unwrap()[0];
        assert_eq!(bar.title, "Bookmarks bar");
        let work = &bar.children.as_ref().unwrap()[0];
        assert_eq!(work.children.as_ref().unwrap()[0].id, page.id);

        let found = browser
            .search(BookmarkQuery::Text("RUST".into()))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        let by_title = browser
            .search(BookmarkQuery::Title("Work".into()))
            .await
            .unwrap();
        assert_eq!(by_title[0].id, folder.id);
    }

    #[tokio::test]
    async fn test_move_rejects_cycles() {
        let browser = MemoryBrowser::new();
        let outer = BookmarkStore::create(
            &browser,
            NewBookmark {
                parent_id: Some("1".into()),
                title: "outer".into(),
                url: None,
            },
        )
        .await
        .unwrap();
        let inner = BookmarkStore::create(
            &browser,
            NewBookmark {
                parent_id: Some(outer.id.clone()),
                title: "inner".into(),
                url: None,
            },
        )
        .await
        .unwrap();
        let result = browser
            .move_node(
                &outer.id,
                BookmarkDestination {
                    parent_id: Some(inner.id.clone()),
                    index: None,
                },
            )
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_tab_removal_notifies_and_detaches() {
        let browser = MemoryBrowser::new();
        let tab = browser.seed_tab("https://a.com", "A");
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (dtx, mut drx) = mpsc::unbounded_channel();
        let _tabs = TabStore::subscribe(&browser, tx);
        let _debug = DebugAttach::subscribe(&browser, tab, dtx);

        browser.attach(tab).await.unwrap();
        TabStore::remove(&browser, &[tab]).await.unwrap();

        assert!(matches!(
            drx.recv().await,
            Some(DebugEvent::Detached { tab_id, .. }) if tab_id == tab
        ));
        assert_eq!(
            rx.recv().await,
            Some(TabEvent::Removed {
                tab_id: tab,
                window_closing: false
            })
        );
        assert!(!browser.is_attached(tab));
    }

    #[tokio::test]
    async fn test_dropping_subscription_unregisters() {
        let browser = MemoryBrowser::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let sub = TabStore::subscribe(&browser, tx);
        assert_eq!(browser.tab_listener_count(), 1);
        drop(sub);
        assert_eq!(browser.tab_listener_count(), 0);
    }

    #[tokio::test]
    async fn test_debugger_requires_attach() {
        let browser = MemoryBrowser::new();
        let tab = browser.seed_tab("https://a.com", "A");
        assert!(browser
            .send_command(tab, "Runtime.evaluate", json!({"expression": "1"}))
            .await
            .is_err());
        browser.attach(tab).await.unwrap();
        assert!(browser.attach(tab).await.is_err());
        let result = browser
            .send_command(tab, "Runtime.evaluate", json!({"expression": "1+1"}))
            .await
            .unwrap();
        assert_eq!(result["result"]["value"], "1+1");
    }

    #[tokio::test]
    async fn test_kv_store_get_returns_present_keys_only() {
        let store = MemoryKvStore::new();
        let mut items = Map::new();
        items.insert("a".into(), json!(1));
        store.set(items).await.unwrap();
        let got = store.get(&["a", "b"]).await.unwrap();
        assert_eq!(got.len(), 1);
        store.remove(&["a"]).await.unwrap();
        assert!(store.get(&["a"]).await.unwrap().is_empty());
    }
}
