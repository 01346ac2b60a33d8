//! Outbound event stream.
//!
//! Tab lifecycle, debugger protocol and content-page signals are mapped to the
//! session that owns them and forwarded to the gateway. Events for sessions
//! that no longer exist are dropped.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use skylink_core::host::{DebugEvent, Host, TabChange, TabEvent};
use skylink_core::{Error, EventEnvelope, Outbound, Result, SessionKind, TabId};
use skylink_handlers::auto_bookmark;
use skylink_storage::{LogEntry, SessionRecord, SessionRegistry};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, trace, warn};

use crate::OutboundSink;

/// Debugger notifications worth forwarding.
pub const DEBUG_EVENT_ALLOW_LIST: &[&str] = &[
    "Runtime.consoleAPICalled",
    "Runtime.exceptionThrown",
    "Log.entryAdded",
    "Network.requestWillBeSent",
    "Network.responseReceived",
    "Network.loadingFailed",
    "Page.loadEventFired",
    "Page.frameNavigated",
];

/// Detach reason the browser reports when the debugged tab goes away.
const TARGET_CLOSED: &str = "target_closed";

/// Result of the content script's page classifier.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageAnalysis {
    #[serde(default)]
    pub is_work_related: bool,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub factors: Vec<String>,
}

/// Signal raised by a content page.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentEvent {
    /// `collaboration.<kind>` from a page in a shared session.
    Interaction {
        session_id: String,
        kind: String,
        data: Value,
    },
    ConsoleLog {
        tab_id: TabId,
        message: String,
        level: String,
        timestamp: Option<i64>,
    },
    PageAnalysis {
        tab_id: TabId,
        url: String,
        title: String,
        analysis: PageAnalysis,
    },
}

impl ContentEvent {
    /// Decode a content-script message sent from `tab_id`.
    ///
    /// Recognised types: `collaboration.interaction`, `collaboration.scroll`,
    /// `collaboration.click`, `debug.console.log` and `page.analysis`.
    pub fn from_message(tab_id: TabId, message: &Value) -> Result<Self> {
        let kind = message
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Protocol("content message without type".to_string()))?;
        let text = |key: &str| {
            message
                .get(key)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };

        match kind {
            "collaboration.interaction" | "collaboration.scroll" | "collaboration.click" => {
                let session_id = text("sessionId");
                if session_id.is_empty() {
                    return Err(Error::Validation("Session ID required".to_string()));
                }
                let data = if kind == "collaboration.interaction" {
                    message.get("event").cloned().unwrap_or(Value::Null)
                } else {
                    let mut rest: Map<String, Value> = message.as_object().cloned().unwrap_or_default();
                    rest.remove("type");
                    rest.remove("sessionId");
                    Value::Object(rest)
                };
                Ok(ContentEvent::Interaction {
                    session_id,
                    kind: kind.trim_start_matches("collaboration.").to_string(),
                    data,
                })
            }
            "debug.console.log" => Ok(ContentEvent::ConsoleLog {
                tab_id,
                message: text("message"),
                level: message
                    .get("level")
                    .and_then(Value::as_str)
                    .unwrap_or("log")
                    .to_string(),
                timestamp: message.get("timestamp").and_then(Value::as_i64),
            }),
            "page.analysis" => {
                let analysis = match message.get("data") {
                    Some(data) => serde_json::from_value(data.clone())?,
                    None => PageAnalysis::default(),
                };
                Ok(ContentEvent::PageAnalysis {
                    tab_id,
                    url: text("url"),
                    title: text("title"),
                    analysis,
                })
            }
            other => Err(Error::Protocol(format!("unknown content message: {}", other))),
        }
    }
}

#[derive(Clone)]
pub struct Emitter {
    sessions: Arc<SessionRegistry>,
    host: Host,
    sink: Arc<dyn OutboundSink>,
}

impl Emitter {
    pub fn new(sessions: Arc<SessionRegistry>, host: Host, sink: Arc<dyn OutboundSink>) -> Self {
        Self {
            sessions,
            host,
            sink,
        }
    }

    pub async fn run_loop(
        self,
        mut tab_events: mpsc::UnboundedReceiver<TabEvent>,
        mut debug_events: mpsc::UnboundedReceiver<DebugEvent>,
        mut content_events: mpsc::UnboundedReceiver<ContentEvent>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        info!("Event emitter started");
        loop {
            tokio::select! {
                Some(event) = tab_events.recv() => self.on_tab_event(event).await,
                Some(event) = debug_events.recv() => self.on_debug_event(event),
                Some(event) = content_events.recv() => self.on_content_event(event).await,
                _ = shutdown.recv() => {
                    info!("Event emitter shutting down");
                    break;
                }
                else => {
                    debug!("All event sources closed");
                    break;
                }
            }
        }
    }

    pub async fn on_tab_event(&self, event: TabEvent) {
        match event {
            TabEvent::Removed { tab_id, .. } => {
                for record in self.sessions.remove_by_owner_tab(tab_id) {
                    if record.kind == SessionKind::Debug {
                        if let Err(e) = self.host.debugger.detach(tab_id).await {
                            debug!(tab_id, error = %e, "Detach on tab close");
                        }
                    }
                    info!(session_id = %record.session_id, tab_id, "Session ended, tab closed");
                    self.emit(session_ended(&record, "tabClosed"));
                }
            }
            TabEvent::Updated { tab_id, change } => {
                for record in self.sessions.find_by_owner_tab(tab_id, SessionKind::SharedTab) {
                    let entry = LogEntry::new("tab.updated", serde_json::to_value(&change).unwrap_or_default());
                    if !self.sessions.record_action(&record.session_id, entry) {
                        continue;
                    }
                    self.emit(shared_tab_updated(&record.session_id, tab_id, &change));
                }
            }
            other => trace!(tab_id = other.tab_id(), "Ignoring tab event"),
        }
    }

    pub fn on_debug_event(&self, event: DebugEvent) {
        match event {
            DebugEvent::Protocol {
                tab_id,
                method,
                params,
            } => {
                if !DEBUG_EVENT_ALLOW_LIST.contains(&method.as_str()) {
                    trace!(tab_id, method = %method, "Debugger event filtered");
                    return;
                }
                for record in self.sessions.find_by_owner_tab(tab_id, SessionKind::Debug) {
                    let entry = LogEntry::new("debug.event", Value::String(method.clone()));
                    if !self.sessions.record_action(&record.session_id, entry) {
                        continue;
                    }
                    self.emit(
                        EventEnvelope::new("debug.event")
                            .session(&record.session_id)
                            .field("tabId", tab_id)
                            .field("method", method.as_str())
                            .field("params", params.clone()),
                    );
                }
            }
            DebugEvent::Detached { tab_id, reason } => {
                let ended = if reason == TARGET_CLOSED {
                    "tabClosed"
                } else {
                    "detached"
                };
                for record in self.sessions.find_by_owner_tab(tab_id, SessionKind::Debug) {
                    if self.sessions.remove(&record.session_id).is_none() {
                        continue;
                    }
                    info!(session_id = %record.session_id, tab_id, reason = %reason, "Debugger detached");
                    self.emit(session_ended(&record, ended).field("detail", reason.as_str()));
                }
            }
        }
    }

    pub async fn on_content_event(&self, event: ContentEvent) {
        match event {
            ContentEvent::Interaction {
                session_id,
                kind,
                data,
            } => {
                let live = self
                    .sessions
                    .get(&session_id)
                    .is_some_and(|r| r.kind == SessionKind::SharedTab);
                if !live {
                    debug!(session_id = %session_id, "Interaction for unknown session");
                    return;
                }
                let event_type = format!("collaboration.{}", kind);
                if !self
                    .sessions
                    .record_action(&session_id, LogEntry::new(&event_type, data.clone()))
                {
                    return;
                }
                self.emit(
                    EventEnvelope::new(&event_type)
                        .session(&session_id)
                        .field("data", data),
                );
            }
            ContentEvent::ConsoleLog {
                tab_id,
                message,
                level,
                timestamp,
            } => {
                for record in self.sessions.find_by_owner_tab(tab_id, SessionKind::Debug) {
                    let entry = LogEntry::new("debug.console.log", Value::String(level.clone()));
                    if !self.sessions.record_action(&record.session_id, entry) {
                        continue;
                    }
                    self.emit(
                        EventEnvelope::new("debug.console.log")
                            .session(&record.session_id)
                            .field("tabId", tab_id)
                            .field("message", message.as_str())
                            .field("level", level.as_str())
                            .field("timestamp", timestamp),
                    );
                }
            }
            ContentEvent::PageAnalysis {
                tab_id,
                url,
                title,
                analysis,
            } => {
                if !analysis.is_work_related {
                    return;
                }
                match auto_bookmark::is_enabled(self.host.storage.as_ref()).await {
                    Ok(true) => {}
                    Ok(false) => return,
                    Err(e) => {
                        warn!(error = %e, "Could not read auto-bookmark setting");
                        return;
                    }
                }
                debug!(tab_id, url = %url, confidence = analysis.confidence, "Suggesting bookmark");
                self.emit(
                    EventEnvelope::new("bookmark.suggested")
                        .field("tabId", tab_id)
                        .field("url", url)
                        .field("title", title)
                        .field("confidence", analysis.confidence)
                        .field("factors", analysis.factors),
                );
            }
        }
    }

    fn emit(&self, event: EventEnvelope) {
        let kind = event.kind.clone();
        if !self.sink.send(&Outbound::Event(event)) {
            debug!(kind = %kind, "Event dropped, gateway not connected");
        }
    }
}

fn session_ended(record: &SessionRecord, reason: &str) -> EventEnvelope {
    EventEnvelope::new("session.ended")
        .session(&record.session_id)
        .field("kind", record.kind.as_str())
        .field("tabId", record.owner_tab_id)
        .field("reason", reason)
}

fn shared_tab_updated(session_id: &str, tab_id: TabId, change: &TabChange) -> EventEnvelope {
    let mut event = EventEnvelope::new("shared.tab.updated")
        .session(session_id)
        .field("tabId", tab_id);
    if let Some(url) = &change.url {
        event = event.field("url", url.as_str());
    }
    if let Some(title) = &change.title {
        event = event.field("title", title.as_str());
    }
    if let Some(status) = &change.status {
        event = event.field("status", status.as_str());
    }
    event
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingSink;
    use serde_json::json;
    use skylink_core::host::memory::MemoryBrowser;
    use skylink_storage::SessionMetadata;

    fn emitter() -> (Emitter, MemoryBrowser, Arc<RecordingSink>) {
        let (host, browser) = Host::in_memory();
        let sink = Arc::new(RecordingSink::default());
        let emitter = Emitter::new(Arc::new(SessionRegistry::default()), host, sink.clone());
        (emitter, browser, sink)
    }

    fn events(sink: &RecordingSink) -> Vec<EventEnvelope> {
        sink.take()
            .into_iter()
            .filter_map(|m| match m {
                Outbound::Event(e) => Some(e),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_closing_owner_tab_ends_session_once() {
        let (emitter, browser, sink) = emitter();
        let tab = browser.seed_tab("https://a.com", "A");
        let session_id = emitter
            .sessions
            .create(SessionKind::SharedTab, tab, SessionMetadata::default());

        emitter
            .on_tab_event(TabEvent::Removed {
                tab_id: tab,
                window_closing: false,
            })
            .await;
        let sent = events(&sink);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind, "session.ended");
        assert_eq!(sent[0].session_id.as_deref(), Some(session_id.as_str()));
        assert_eq!(sent[0].fields["reason"], "tabClosed");
        assert_eq!(sent[0].fields["kind"], "sharedTab");

        // Anything addressed to the stale session is a silent no-op.
        assert!(!emitter
            .sessions
            .record_action(&session_id, LogEntry::new("late", Value::Null)));
        assert_eq!(emitter.sessions.len(), 0);
        emitter
            .on_content_event(ContentEvent::Interaction {
                session_id: session_id.clone(),
                kind: "scroll".into(),
                data: json!({"scrollTop": 10}),
            })
            .await;
        emitter
            .on_tab_event(TabEvent::Updated {
                tab_id: tab,
                change: TabChange::default(),
            })
            .await;
        assert!(sink.take().is_empty());
    }

    #[tokio::test]
    async fn test_tab_update_forwarded_for_shared_session() {
        let (emitter, browser, sink) = emitter();
        let tab = browser.seed_tab("https://a.com", "A");
        let session_id = emitter
            .sessions
            .create(SessionKind::SharedTab, tab, SessionMetadata::default());

        emitter
            .on_tab_event(TabEvent::Updated {
                tab_id: tab,
                change: TabChange {
                    url: Some("https://a.com/next".into()),
                    title: None,
                    status: Some("complete".into()),
                },
            })
            .await;
        let sent = events(&sink);
        assert_eq!(sent.len(), 1);
        let frame: Value = serde_json::from_str(&Outbound::Event(sent[0].clone()).to_frame().unwrap()).unwrap();
        assert_eq!(
            frame,
            json!({
                "type": "shared.tab.updated",
                "sessionId": session_id,
                "tabId": tab,
                "url": "https://a.com/next",
                "status": "complete"
            })
        );
        assert_eq!(emitter.sessions.get(&session_id).unwrap().log.len(), 1);
    }

    #[tokio::test]
    async fn test_debug_events_filtered_and_detach_ends_session() {
        let (emitter, browser, sink) = emitter();
        let tab = browser.seed_tab("https://a.com", "A");
        let session_id = emitter
            .sessions
            .create(SessionKind::Debug, tab, SessionMetadata::default());

        emitter.on_debug_event(DebugEvent::Protocol {
            tab_id: tab,
            method: "Runtime.consoleAPICalled".into(),
            params: json!({"type": "log"}),
        });
        emitter.on_debug_event(DebugEvent::Protocol {
            tab_id: tab,
            method: "Debugger.scriptParsed".into(),
            params: json!({}),
        });
        emitter.on_debug_event(DebugEvent::Detached {
            tab_id: tab,
            reason: "canceled_by_user".into(),
        });

        let sent = events(&sink);
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].kind, "debug.event");
        assert_eq!(sent[0].fields["method"], "Runtime.consoleAPICalled");
        assert_eq!(sent[1].kind, "session.ended");
        assert_eq!(sent[1].fields["reason"], "detached");
        assert_eq!(sent[1].fields["detail"], "canceled_by_user");
        assert!(!emitter.sessions.contains(&session_id));
    }

    #[tokio::test]
    async fn test_page_analysis_suggests_only_when_enabled() {
        let (emitter, _browser, sink) = emitter();
        let message = json!({
            "type": "page.analysis",
            "url": "https://docs.rs",
            "title": "Docs",
            "data": {"isWorkRelated": true, "confidence": 0.8, "factors": ["domain"]}
        });
        let event = ContentEvent::from_message(3, &message).unwrap();

        emitter.on_content_event(event.clone()).await;
        assert!(sink.take().is_empty());

        auto_bookmark::set_enabled(emitter.host.storage.as_ref(), true)
            .await
            .unwrap();
        emitter.on_content_event(event).await;
        let sent = events(&sink);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind, "bookmark.suggested");
        assert_eq!(sent[0].fields["tabId"], 3);
        assert_eq!(sent[0].fields["factors"], json!(["domain"]));
    }

    #[test]
    fn test_content_message_decoding() {
        let scroll = ContentEvent::from_message(
            1,
            &json!({"type": "collaboration.scroll", "sessionId": "s1", "scrollTop": 5, "scrollLeft": 0}),
        )
        .unwrap();
        assert_eq!(
            scroll,
            ContentEvent::Interaction {
                session_id: "s1".into(),
                kind: "scroll".into(),
                data: json!({"scrollTop": 5, "scrollLeft": 0}),
            }
        );

        let log = ContentEvent::from_message(2, &json!({"type": "debug.console.log", "message": "hi"})).unwrap();
        assert!(matches!(log, ContentEvent::ConsoleLog { tab_id: 2, ref level, .. } if level == "log"));

        assert!(ContentEvent::from_message(1, &json!({"type": "collaboration.click"})).is_err());
        assert!(ContentEvent::from_message(1, &json!({"type": "mystery"})).is_err());
        assert!(ContentEvent::from_message(1, &json!({})).is_err());
    }
}
