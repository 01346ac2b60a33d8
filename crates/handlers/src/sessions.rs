//! Shared-tab sessions and their collaboration tools.

use async_trait::async_trait;
use serde_json::{json, Value};
use skylink_core::host::TabQuery;
use skylink_core::{Error, Result, SessionKind, TabId};
use skylink_storage::{LogEntry, SessionMetadata, SessionRecord};
use std::collections::BTreeMap;
use tracing::info;

use crate::{bool_param, require_str, str_param, tab_id_param, Handler, HandlerContext, HandlerSchema};

/// Collaboration features every shared session starts with.
const SHARED_FEATURES: &[&str] = &["cursor", "highlight", "annotations"];

/// Look up a live session of `kind`, mapping absence to a handler error.
pub(crate) fn live_session(
    ctx: &HandlerContext,
    session_id: &str,
    kind: SessionKind,
) -> Result<SessionRecord> {
    match ctx.sessions.get(session_id) {
        Some(record) if record.kind == kind => Ok(record),
        _ => Err(Error::NotFound(format!("session {}", session_id))),
    }
}

/// Confirm the owner tab outlived session setup. Tab closure only removes
/// sessions that already exist, so one created for a tab that closed
/// meanwhile is removed here.
pub(crate) async fn confirm_owner_tab(
    ctx: &HandlerContext,
    session_id: &str,
    tab_id: TabId,
) -> Result<()> {
    let present = ctx
        .host
        .tabs
        .query(TabQuery::default())
        .await
        .map(|tabs| tabs.iter().any(|t| t.id == tab_id));
    match present {
        Ok(true) => Ok(()),
        Ok(false) => {
            ctx.sessions.remove(session_id);
            info!(session_id = %session_id, tab_id, "Tab closed during session setup");
            Err(Error::NotFound(format!("tab {}", tab_id)))
        }
        Err(e) => {
            ctx.sessions.remove(session_id);
            Err(e)
        }
    }
}

pub struct SharedTabCreateHandler;

#[async_trait]
impl Handler for SharedTabCreateHandler {
    fn schema(&self) -> HandlerSchema {
        HandlerSchema {
            action: "shared.tab.create",
            capability: "sessions",
            description: "Start a shared session on an existing tab or a newly opened URL.",
        }
    }

    fn validate(&self, params: &Value) -> Result<()> {
        if tab_id_param(params, "tabId").is_none() && str_param(params, "url").is_none() {
            return Err(Error::Validation("Tab ID or URL required".to_string()));
        }
        Ok(())
    }

    async fn execute(&self, ctx: HandlerContext, params: Value) -> Result<Value> {
        let tab_id: TabId = match tab_id_param(&params, "tabId") {
            Some(id) => {
                let tabs = ctx.host.tabs.query(TabQuery::default()).await?;
                if !tabs.iter().any(|t| t.id == id) {
                    return Err(Error::NotFound(format!("tab {}", id)));
                }
                id
            }
            None => {
                let url = require_str(&params, "url", "Tab ID or URL required")?;
                ctx.host.tabs.create(Some(url), true).await?.id
            }
        };

        let metadata = SessionMetadata {
            name: str_param(&params, "sessionName").map(str::to_string),
            participants: str_param(&params, "participant")
                .map(|p| vec![p.to_string()])
                .unwrap_or_default(),
            features: SHARED_FEATURES
                .iter()
                .map(|f| (f.to_string(), true))
                .collect::<BTreeMap<_, _>>(),
        };
        let session_id = ctx.sessions.create(SessionKind::SharedTab, tab_id, metadata);
        confirm_owner_tab(&ctx, &session_id, tab_id).await?;
        ctx.sessions
            .record_action(&session_id, LogEntry::new("shared.tab.create", json!({ "tabId": tab_id })));
        info!(session_id = %session_id, tab_id, "Shared session started");

        let record = live_session(&ctx, &session_id, SessionKind::SharedTab)?;
        Ok(record.summary())
    }
}

pub struct SharedTabJoinHandler;

#[async_trait]
impl Handler for SharedTabJoinHandler {
    fn schema(&self) -> HandlerSchema {
        HandlerSchema {
            action: "shared.tab.join",
            capability: "sessions",
            description: "Join an existing shared session.",
        }
    }

    fn validate(&self, params: &Value) -> Result<()> {
        require_str(params, "sessionId", "Session ID required").map(|_| ())
    }

    async fn execute(&self, ctx: HandlerContext, params: Value) -> Result<Value> {
        let session_id = require_str(&params, "sessionId", "Session ID required")?;
        live_session(&ctx, session_id, SessionKind::SharedTab)?;

        let participant = str_param(&params, "participant").unwrap_or("gateway");
        ctx.sessions
            .update(session_id, |record| record.add_participant(participant))
            .ok_or_else(|| Error::NotFound(format!("session {}", session_id)))?;
        ctx.sessions.record_action(
            session_id,
            LogEntry::new("shared.tab.join", json!({ "participant": participant })),
        );

        let record = live_session(&ctx, session_id, SessionKind::SharedTab)?;
        Ok(record.summary())
    }
}

pub struct SharedTabEndHandler;

#[async_trait]
impl Handler for SharedTabEndHandler {
    fn schema(&self) -> HandlerSchema {
        HandlerSchema {
            action: "shared.tab.end",
            capability: "sessions",
            description: "End a shared session.",
        }
    }

    fn validate(&self, params: &Value) -> Result<()> {
        require_str(params, "sessionId", "Session ID required").map(|_| ())
    }

    async fn execute(&self, ctx: HandlerContext, params: Value) -> Result<Value> {
        let session_id = require_str(&params, "sessionId", "Session ID required")?;
        let ended = match ctx.sessions.get(session_id) {
            Some(record) if record.kind == SessionKind::SharedTab => {
                ctx.sessions.remove(session_id).is_some()
            }
            _ => false,
        };
        if ended {
            info!(session_id = %session_id, "Shared session ended");
        }
        Ok(json!({ "sessionId": session_id, "ended": ended }))
    }
}

pub struct SharedSessionsListHandler;

#[async_trait]
impl Handler for SharedSessionsListHandler {
    fn schema(&self) -> HandlerSchema {
        HandlerSchema {
            action: "shared.sessions.list",
            capability: "sessions",
            description: "List live shared sessions.",
        }
    }

    fn validate(&self, _params: &Value) -> Result<()> {
        Ok(())
    }

    async fn execute(&self, ctx: HandlerContext, _params: Value) -> Result<Value> {
        let sessions: Vec<Value> = ctx
            .sessions
            .list(SessionKind::SharedTab)
            .iter()
            .map(SessionRecord::summary)
            .collect();
        Ok(Value::Array(sessions))
    }
}

pub struct CollaborationToolToggleHandler;

#[async_trait]
impl Handler for CollaborationToolToggleHandler {
    fn schema(&self) -> HandlerSchema {
        HandlerSchema {
            action: "collaboration.tool.toggle",
            capability: "sessions",
            description: "Switch a collaboration tool on or off for one or every shared session.",
        }
    }

    fn validate(&self, params: &Value) -> Result<()> {
        require_str(params, "tool", "Tool required")?;
        if bool_param(params, "enabled").is_none() {
            return Err(Error::Validation("enabled must be a boolean".to_string()));
        }
        Ok(())
    }

    async fn execute(&self, ctx: HandlerContext, params: Value) -> Result<Value> {
        let tool = require_str(&params, "tool", "Tool required")?;
        let enabled = bool_param(&params, "enabled")
            .ok_or_else(|| Error::Validation("enabled must be a boolean".to_string()))?;

        let targets: Vec<String> = match str_param(&params, "sessionId") {
            Some(session_id) => {
                live_session(&ctx, session_id, SessionKind::SharedTab)?;
                vec![session_id.to_string()]
            }
            None => ctx
                .sessions
                .list(SessionKind::SharedTab)
                .into_iter()
                .map(|r| r.session_id)
                .collect(),
        };

        for session_id in &targets {
            ctx.sessions.update(session_id, |record| {
                record.tools.insert(tool.to_string(), enabled);
            });
            ctx.sessions.record_action(
                session_id,
                LogEntry::new("collaboration.tool.toggle", json!({ "tool": tool, "enabled": enabled })),
            );
        }

        Ok(json!({ "tool": tool, "enabled": enabled }))
    }
}
