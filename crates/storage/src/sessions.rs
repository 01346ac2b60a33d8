//! In-memory registry of shared-tab and debug sessions.
//!
//! Membership is the only notion of "session active": every mutation looks the
//! id up first and quietly does nothing when the session has already ended.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use skylink_core::host::Subscription;
use skylink_core::types::{now_ms, SessionKind, TabId};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub at: i64,
    pub action: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
}

impl LogEntry {
    pub fn new(action: &str, data: Value) -> Self {
        Self {
            at: now_ms(),
            action: action.to_string(),
            data,
        }
    }
}

/// Optional fields supplied when a session is opened.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionMetadata {
    pub name: Option<String>,
    pub participants: Vec<String>,
    pub features: BTreeMap<String, bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub session_id: String,
    pub kind: SessionKind,
    pub owner_tab_id: TabId,
    pub created: i64,
    pub last_activity: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub participants: Vec<String>,
    #[serde(default)]
    pub features: BTreeMap<String, bool>,
    #[serde(default)]
    pub tools: BTreeMap<String, bool>,
    #[serde(default)]
    pub log: VecDeque<LogEntry>,
}

impl SessionRecord {
    /// Wire form returned by the session actions. The log is reported as a count.
    pub fn summary(&self) -> Value {
        let mut value = json!({
            "sessionId": self.session_id,
            "kind": self.kind,
            "tabId": self.owner_tab_id,
            "created": self.created,
            "lastActivity": self.last_activity,
            "participants": self.participants,
            "features": self.features,
            "tools": self.tools,
            "logEntries": self.log.len(),
        });
        if let (Some(name), Some(obj)) = (&self.name, value.as_object_mut()) {
            obj.insert("sessionName".to_string(), json!(name));
        }
        value
    }

    pub fn add_participant(&mut self, participant: &str) -> bool {
        if self.participants.iter().any(|p| p == participant) {
            return false;
        }
        self.participants.push(participant.to_string());
        true
    }

    fn touch(&mut self) {
        self.last_activity = now_ms().max(self.last_activity);
    }
}

struct SessionEntry {
    record: SessionRecord,
    subscriptions: Vec<Subscription>,
}

pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, SessionEntry>>,
    counter: AtomicU64,
    max_log_entries: usize,
}

impl SessionRegistry {
    /// `max_log_entries == 0` keeps every entry.
    pub fn new(max_log_entries: usize) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            counter: AtomicU64::new(0),
            max_log_entries,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, SessionEntry>> {
        self.sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn next_id(&self, kind: SessionKind) -> String {
        let seq = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        let prefix = match kind {
            SessionKind::SharedTab => "shared",
            SessionKind::Debug => "debug",
        };
        format!("{}_{}_{}", prefix, uuid::Uuid::new_v4().simple(), seq)
    }

    pub fn create(&self, kind: SessionKind, owner_tab_id: TabId, metadata: SessionMetadata) -> String {
        let session_id = self.next_id(kind);
        let now = now_ms();
        let record = SessionRecord {
            session_id: session_id.clone(),
            kind,
            owner_tab_id,
            created: now,
            last_activity: now,
            name: metadata.name,
            participants: metadata.participants,
            features: metadata.features,
            tools: BTreeMap::new(),
            log: VecDeque::new(),
        };
        self.lock().insert(
            session_id.clone(),
            SessionEntry {
                record,
                subscriptions: Vec::new(),
            },
        );
        debug!(session_id = %session_id, kind = %kind, tab_id = owner_tab_id, "Session created");
        session_id
    }

    pub fn get(&self, session_id: &str) -> Option<SessionRecord> {
        self.lock().get(session_id).map(|e| e.record.clone())
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.lock().contains_key(session_id)
    }

    /// Append to the session log. Returns `false` if the session is gone.
    pub fn record_action(&self, session_id: &str, entry: LogEntry) -> bool {
        let mut sessions = self.lock();
        let Some(session) = sessions.get_mut(session_id) else {
            debug!(session_id = %session_id, action = %entry.action, "Ignoring activity for ended session");
            return false;
        };
        let record = &mut session.record;
        record.log.push_back(entry);
        if self.max_log_entries > 0 {
            while record.log.len() > self.max_log_entries {
                record.log.pop_front();
            }
        }
        record.touch();
        true
    }

    /// Mutate a live record. Returns `None` if the session is gone.
    pub fn update<R>(&self, session_id: &str, f: impl FnOnce(&mut SessionRecord) -> R) -> Option<R> {
        let mut sessions = self.lock();
        let Some(session) = sessions.get_mut(session_id) else {
            debug!(session_id = %session_id, "Ignoring update for ended session");
            return None;
        };
        let result = f(&mut session.record);
        session.record.touch();
        Some(result)
    }

    /// Tie a listener to the session's lifetime. A subscription offered to an
    /// ended session is released immediately.
    pub fn attach_subscription(&self, session_id: &str, subscription: Subscription) -> bool {
        let rejected = {
            let mut sessions = self.lock();
            match sessions.get_mut(session_id) {
                Some(session) => {
                    session.subscriptions.push(subscription);
                    None
                }
                None => Some(subscription),
            }
        };
        match rejected {
            Some(subscription) => {
                debug!(session_id = %session_id, "Session gone, releasing subscription");
                subscription.unsubscribe();
                false
            }
            None => true,
        }
    }

    pub fn remove(&self, session_id: &str) -> Option<SessionRecord> {
        let entry = self.lock().remove(session_id)?;
        debug!(session_id = %session_id, "Session removed");
        // Subscriptions are released here, outside the registry lock.
        Some(entry.record)
    }

    pub fn remove_by_owner_tab(&self, tab_id: TabId) -> Vec<SessionRecord> {
        let removed: Vec<SessionEntry> = {
            let mut sessions = self.lock();
            let ids: Vec<String> = sessions
                .iter()
                .filter(|(_, e)| e.record.owner_tab_id == tab_id)
                .map(|(id, _)| id.clone())
                .collect();
            ids.iter().filter_map(|id| sessions.remove(id)).collect()
        };
        if !removed.is_empty() {
            debug!(tab_id, count = removed.len(), "Removed sessions owned by tab");
        }
        let mut records: Vec<SessionRecord> = removed.into_iter().map(|e| e.record).collect();
        records.sort_by_key(|r| r.created);
        records
    }

    pub fn find_by_owner_tab(&self, tab_id: TabId, kind: SessionKind) -> Vec<SessionRecord> {
        let mut records: Vec<SessionRecord> = self
            .lock()
            .values()
            .filter(|e| e.record.owner_tab_id == tab_id && e.record.kind == kind)
            .map(|e| e.record.clone())
            .collect();
        records.sort_by(|a, b| a.created.cmp(&b.created).then(a.session_id.cmp(&b.session_id)));
        records
    }

    /// Live sessions of `kind`, oldest first.
    pub fn list(&self, kind: SessionKind) -> Vec<SessionRecord> {
        let mut records: Vec<SessionRecord> = self
            .lock()
            .values()
            .filter(|e| e.record.kind == kind)
            .map(|e| e.record.clone())
            .collect();
        records.sort_by(|a, b| a.created.cmp(&b.created).then(a.session_id.cmp(&b.session_id)));
        records
    }

    pub fn count(&self, kind: SessionKind) -> usize {
        self.lock().values().filter(|e| e.record.kind == kind).count()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Drop every session and release their subscriptions.
    pub fn clear(&self) -> Vec<SessionRecord> {
        let drained: Vec<SessionEntry> = self.lock().drain().map(|(_, e)| e).collect();
        drained.into_iter().map(|e| e.record).collect()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(1000)
    }
}
