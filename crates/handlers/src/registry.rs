use skylink_core::{Error, Result};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::debug;

use crate::auto_bookmark::{AutoBookmarkStatusHandler, AutoBookmarkToggleHandler};
use crate::bookmarks::{
    BookmarksAddHandler, BookmarksDeleteHandler, BookmarksDuplicatesHandler, BookmarksListHandler,
    BookmarksMoveHandler, BookmarksSearchHandler,
};
use crate::debug::{
    DebugEnableHandler, DebugExecuteHandler, DebugInjectHandler, DebugSessionsListHandler,
    DebugStopHandler,
};
use crate::sessions::{
    CollaborationToolToggleHandler, SharedSessionsListHandler, SharedTabCreateHandler,
    SharedTabEndHandler, SharedTabJoinHandler,
};
use crate::status::StatusHandler;
use crate::tabs::{
    TabsCloseHandler, TabsCreateHandler, TabsFocusHandler, TabsGroupByDomainHandler,
    TabsListHandler,
};
use crate::Handler;

/// Every action the bridge must answer.
pub const BUILTIN_ACTIONS: &[&str] = &[
    "bookmarks.list",
    "bookmarks.search",
    "bookmarks.add",
    "bookmarks.delete",
    "bookmarks.move",
    "bookmarks.duplicates",
    "tabs.list",
    "tabs.create",
    "tabs.close",
    "tabs.focus",
    "tabs.groupByDomain",
    "status",
    "shared.tab.create",
    "shared.tab.join",
    "shared.tab.end",
    "shared.sessions.list",
    "collaboration.tool.toggle",
    "debug.enable",
    "debug.execute",
    "debug.inject",
    "debug.sessions.list",
    "debug.stop",
    "auto-bookmark.status",
    "auto-bookmark.enable",
    "auto-bookmark.disable",
];

#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn Handler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in handler, checked for completeness.
    pub fn with_defaults() -> Result<Self> {
        let mut registry = Self::new();

        // Bookmarks
        registry.register(Arc::new(BookmarksListHandler))?;
        registry.register(Arc::new(BookmarksSearchHandler))?;
        registry.register(Arc::new(BookmarksAddHandler))?;
        registry.register(Arc::new(BookmarksDeleteHandler))?;
        registry.register(Arc::new(BookmarksMoveHandler))?;
        registry.register(Arc::new(BookmarksDuplicatesHandler))?;

        // Tabs
        registry.register(Arc::new(TabsListHandler))?;
        registry.register(Arc::new(TabsCreateHandler))?;
        registry.register(Arc::new(TabsCloseHandler))?;
        registry.register(Arc::new(TabsFocusHandler))?;
        registry.register(Arc::new(TabsGroupByDomainHandler))?;

        registry.register(Arc::new(StatusHandler))?;

        // Shared tabs & collaboration
        registry.register(Arc::new(SharedTabCreateHandler))?;
        registry.register(Arc::new(SharedTabJoinHandler))?;
        registry.register(Arc::new(SharedTabEndHandler))?;
        registry.register(Arc::new(SharedSessionsListHandler))?;
        registry.register(Arc::new(CollaborationToolToggleHandler))?;

        // Remote debugging
        registry.register(Arc::new(DebugEnableHandler))?;
        registry.register(Arc::new(DebugExecuteHandler))?;
        registry.register(Arc::new(DebugInjectHandler))?;
        registry.register(Arc::new(DebugSessionsListHandler))?;
        registry.register(Arc::new(DebugStopHandler))?;

        // Auto-bookmarking
        registry.register(Arc::new(AutoBookmarkStatusHandler))?;
        registry.register(Arc::new(AutoBookmarkToggleHandler::enable()))?;
        registry.register(Arc::new(AutoBookmarkToggleHandler::disable()))?;

        registry.ensure_builtins()?;
        Ok(registry)
    }

    pub fn register(&mut self, handler: Arc<dyn Handler>) -> Result<()> {
        let schema = handler.schema();
        if self.handlers.contains_key(schema.action) {
            return Err(Error::Config(format!(
                "Duplicate handler for action: {}",
                schema.action
            )));
        }
        debug!(action = schema.action, "Registering handler");
        self.handlers.insert(schema.action.to_string(), handler);
        Ok(())
    }

    pub fn ensure_builtins(&self) -> Result<()> {
        let missing: Vec<&str> = BUILTIN_ACTIONS
            .iter()
            .copied()
            .filter(|action| !self.handlers.contains_key(*action))
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(Error::Config(format!(
                "Missing handlers for actions: {}",
                missing.join(", ")
            )))
        }
    }

    pub fn get(&self, action: &str) -> Option<&Arc<dyn Handler>> {
        self.handlers.get(action)
    }

    /// Registered action names, sorted.
    pub fn actions(&self) -> Vec<String> {
        let mut actions: Vec<String> = self.handlers.keys().cloned().collect();
        actions.sort();
        actions
    }

    /// Capability groups for the hello frame, sorted and de-duplicated.
    pub fn capabilities(&self) -> Vec<String> {
        self.handlers
            .values()
            .map(|h| h.schema().capability.to_string())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
