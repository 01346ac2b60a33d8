//! Debug-attach sessions: one debugger per tab, protocol domains enabled per
//! the requested options, commands forwarded only while the session lives.

use async_trait::async_trait;
use serde_json::{json, Value};
use skylink_core::{Error, Result, SessionKind, TabId};
use skylink_storage::{LogEntry, SessionMetadata, SessionRecord};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use crate::sessions::{confirm_owner_tab, live_session};
use crate::{require_str, str_param, tab_id_param, Handler, HandlerContext, HandlerSchema};

/// Option name, default, and the protocol domains it switches on.
const DEBUG_OPTIONS: &[(&str, bool, &[&str])] = &[
    ("console", true, &["Runtime.enable", "Log.enable"]),
    ("network", false, &["Network.enable"]),
    ("runtime", true, &["Runtime.enable"]),
    ("dom", false, &["DOM.enable"]),
    ("performance", false, &["Performance.enable"]),
];

fn requested_features(params: &Value) -> BTreeMap<String, bool> {
    let options = params.get("options");
    DEBUG_OPTIONS
        .iter()
        .map(|(name, default, _)| {
            let enabled = options
                .and_then(|o| o.get(*name))
                .and_then(|v| v.as_bool())
                .unwrap_or(*default);
            (name.to_string(), enabled)
        })
        .collect()
}

/// Protocol commands to enable, in order, without repeats. Page events are
/// always wanted for navigation tracking.
fn enable_commands(features: &BTreeMap<String, bool>) -> Vec<&'static str> {
    let mut commands = vec!["Page.enable"];
    for (name, _, domains) in DEBUG_OPTIONS {
        if features.get(*name).copied().unwrap_or(false) {
            for domain in domains.iter().copied() {
                if !commands.contains(&domain) {
                    commands.push(domain);
                }
            }
        }
    }
    commands
}

/// Resolve the debug session addressed by `sessionId` or `tabId`.
fn target_session(ctx: &HandlerContext, params: &Value) -> Result<SessionRecord> {
    if let Some(session_id) = str_param(params, "sessionId") {
        return live_session(ctx, session_id, SessionKind::Debug);
    }
    let tab_id = tab_id_param(params, "tabId")
        .ok_or_else(|| Error::Validation("Tab ID or session ID required".to_string()))?;
    ctx.sessions
        .find_by_owner_tab(tab_id, SessionKind::Debug)
        .into_iter()
        .next()
        .ok_or_else(|| Error::Session(format!("No debug session for tab {}", tab_id)))
}

fn validate_target(params: &Value) -> Result<()> {
    if str_param(params, "sessionId").is_none() && tab_id_param(params, "tabId").is_none() {
        return Err(Error::Validation("Tab ID or session ID required".to_string()));
    }
    Ok(())
}

/// Tear down a half-built session after a failed setup step.
async fn abandon(ctx: &HandlerContext, session_id: &str, tab_id: TabId) {
    if ctx.sessions.remove(session_id).is_some() {
        if let Err(e) = ctx.host.debugger.detach(tab_id).await {
            debug!(tab_id, error = %e, "Detach after failed setup");
        }
    }
}

pub struct DebugEnableHandler;

#[async_trait]
impl Handler for DebugEnableHandler {
    fn schema(&self) -> HandlerSchema {
        HandlerSchema {
            action: "debug.enable",
            capability: "debug",
            description: "Attach the debugger to a tab and stream selected protocol events.",
        }
    }

    fn validate(&self, params: &Value) -> Result<()> {
        tab_id_param(params, "tabId")
            .map(|_| ())
            .ok_or_else(|| Error::Validation("Tab ID required".to_string()))
    }

    async fn execute(&self, ctx: HandlerContext, params: Value) -> Result<Value> {
        let tab_id = tab_id_param(&params, "tabId")
            .ok_or_else(|| Error::Validation("Tab ID required".to_string()))?;

        if let Some(existing) = ctx
            .sessions
            .find_by_owner_tab(tab_id, SessionKind::Debug)
            .into_iter()
            .next()
        {
            debug!(tab_id, session_id = %existing.session_id, "Debug session already active");
            return Ok(existing.summary());
        }

        ctx.host.debugger.attach(tab_id).await?;

        let features = requested_features(&params);
        let commands = enable_commands(&features);
        let session_id = ctx.sessions.create(
            SessionKind::Debug,
            tab_id,
            SessionMetadata {
                features,
                ..Default::default()
            },
        );
        let subscription = ctx
            .host
            .debugger
            .subscribe(tab_id, ctx.debug_events.clone());
        if !ctx.sessions.attach_subscription(&session_id, subscription) {
            return Err(Error::Session(format!(
                "Tab {} closed while enabling debugging",
                tab_id
            )));
        }
        if let Err(e) = confirm_owner_tab(&ctx, &session_id, tab_id).await {
            if let Err(detach) = ctx.host.debugger.detach(tab_id).await {
                debug!(tab_id, error = %detach, "Detach after tab closed");
            }
            return Err(e);
        }

        for method in commands {
            if let Err(e) = ctx.host.debugger.send_command(tab_id, method, json!({})).await {
                warn!(tab_id, method, error = %e, "Failed to enable protocol domain");
                abandon(&ctx, &session_id, tab_id).await;
                return Err(e);
            }
            if !ctx.sessions.contains(&session_id) {
                return Err(Error::Session(format!(
                    "Tab {} closed while enabling debugging",
                    tab_id
                )));
            }
        }

        ctx.sessions
            .record_action(&session_id, LogEntry::new("debug.enable", json!({ "tabId": tab_id })));
        info!(session_id = %session_id, tab_id, "Debug session started");
        Ok(live_session(&ctx, &session_id, SessionKind::Debug)?.summary())
    }
}

pub struct DebugExecuteHandler;

#[async_trait]
impl Handler for DebugExecuteHandler {
    fn schema(&self) -> HandlerSchema {
        HandlerSchema {
            action: "debug.execute",
            capability: "debug",
            description: "Evaluate an expression in a debugged tab.",
        }
    }

    fn validate(&self, params: &Value) -> Result<()> {
        validate_target(params)?;
        require_str(params, "command", "Command required").map(|_| ())
    }

    async fn execute(&self, ctx: HandlerContext, params: Value) -> Result<Value> {
        let command = require_str(&params, "command", "Command required")?;
        let session = target_session(&ctx, &params)?;

        let response = ctx
            .host
            .debugger
            .send_command(
                session.owner_tab_id,
                "Runtime.evaluate",
                json!({
                    "expression": command,
                    "returnByValue": true,
                    "awaitPromise": true,
                }),
            )
            .await?;

        ctx.sessions.record_action(
            &session.session_id,
            LogEntry::new("debug.execute", json!({ "command": command })),
        );

        if let Some(details) = response.get("exceptionDetails") {
            let message = details
                .pointer("/exception/description")
                .or_else(|| details.get("text"))
                .and_then(|v| v.as_str())
                .unwrap_or("Evaluation failed");
            return Err(Error::Host(message.to_string()));
        }
        Ok(response.get("result").cloned().unwrap_or(response))
    }
}

pub struct DebugInjectHandler;

#[async_trait]
impl Handler for DebugInjectHandler {
    fn schema(&self) -> HandlerSchema {
        HandlerSchema {
            action: "debug.inject",
            capability: "debug",
            description: "Register a script to run on every new document in a debugged tab.",
        }
    }

    fn validate(&self, params: &Value) -> Result<()> {
        validate_target(params)?;
        require_str(params, "script", "Script required").map(|_| ())
    }

    async fn execute(&self, ctx: HandlerContext, params: Value) -> Result<Value> {
        let script = require_str(&params, "script", "Script required")?;
        let session = target_session(&ctx, &params)?;

        let response = ctx
            .host
            .debugger
            .send_command(
                session.owner_tab_id,
                "Page.addScriptToEvaluateOnNewDocument",
                json!({ "source": script }),
            )
            .await?;
        let identifier = response.get("identifier").cloned().unwrap_or(Value::Null);

        ctx.sessions.record_action(
            &session.session_id,
            LogEntry::new("debug.inject", json!({ "identifier": identifier })),
        );
        Ok(json!({ "identifier": identifier }))
    }
}

pub struct DebugSessionsListHandler;

#[async_trait]
impl Handler for DebugSessionsListHandler {
    fn schema(&self) -> HandlerSchema {
        HandlerSchema {
            action: "debug.sessions.list",
            capability: "debug",
            description: "List live debug sessions.",
        }
    }

    fn validate(&self, _params: &Value) -> Result<()> {
        Ok(())
    }

    async fn execute(&self, ctx: HandlerContext, _params: Value) -> Result<Value> {
        Ok(Value::Array(
            ctx.sessions
                .list(SessionKind::Debug)
                .iter()
                .map(SessionRecord::summary)
                .collect(),
        ))
    }
}

pub struct DebugStopHandler;

#[async_trait]
impl Handler for DebugStopHandler {
    fn schema(&self) -> HandlerSchema {
        HandlerSchema {
            action: "debug.stop",
            capability: "debug",
            description: "Detach the debugger and end the session.",
        }
    }

    fn validate(&self, params: &Value) -> Result<()> {
        require_str(params, "sessionId", "Session ID required").map(|_| ())
    }

    async fn execute(&self, ctx: HandlerContext, params: Value) -> Result<Value> {
        let session_id = require_str(&params, "sessionId", "Session ID required")?;
        let removed = match ctx.sessions.get(session_id) {
            Some(record) if record.kind == SessionKind::Debug => ctx.sessions.remove(session_id),
            _ => None,
        };
        let Some(record) = removed else {
            return Ok(json!({ "sessionId": session_id, "stopped": false }));
        };
        if let Err(e) = ctx.host.debugger.detach(record.owner_tab_id).await {
            debug!(tab_id = record.owner_tab_id, error = %e, "Detach on stop");
        }
        info!(session_id = %session_id, "Debug session stopped");
        Ok(json!({ "sessionId": session_id, "stopped": true }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skylink_core::host::DebugEvent;

    #[test]
    fn test_enable_commands_follow_options() {
        let features = requested_features(&json!({"options": {"network": true, "runtime": false}}));
        assert_eq!(features.get("console"), Some(&true));
        assert_eq!(features.get("runtime"), Some(&false));
        assert_eq!(
            enable_commands(&features),
            vec!["Page.enable", "Runtime.enable", "Log.enable", "Network.enable"]
        );
    }

    #[tokio::test]
    async fn test_enable_execute_stop() {
        let (ctx, browser, mut events) = HandlerContext::in_memory();
        let tab = browser.seed_tab("https://a.com", "A");

        let summary = DebugEnableHandler
            .execute(ctx.clone(), json!({"tabId": tab}))
            .await
            .unwrap();
        let session_id = summary["sessionId"].as_str().unwrap().to_string();
        assert_eq!(summary["kind"], "debug");
        assert!(browser.is_attached(tab));

        let again = DebugEnableHandler
            .execute(ctx.clone(), json!({"tabId": tab}))
            .await
            .unwrap();
        assert_eq!(again["sessionId"], session_id.as_str());

        browser.emit_protocol_event(tab, "Runtime.consoleAPICalled", json!({"type": "log"}));
        assert!(matches!(
            events.recv().await,
            Some(DebugEvent::Protocol { ref method, .. }) if method == "Runtime.consoleAPICalled"
        ));

        let result = DebugExecuteHandler
            .execute(ctx.clone(), json!({"tabId": tab, "command": "1+1"}))
            .await
            .unwrap();
        assert_eq!(result["value"], "1+1");

        let stopped = DebugStopHandler
            .execute(ctx.clone(), json!({"sessionId": session_id}))
            .await
            .unwrap();
        assert_eq!(stopped["stopped"], true);
        assert!(!browser.is_attached(tab));
        assert_eq!(browser.debug_listener_count(), 0);

        let err = DebugExecuteHandler
            .execute(ctx, json!({"tabId": tab, "command": "1"}))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Session(_)));
    }

    #[tokio::test]
    async fn test_exception_becomes_error() {
        let (ctx, browser, _events) = HandlerContext::in_memory();
        let tab = browser.seed_tab("https://a.com", "A");
        DebugEnableHandler
            .execute(ctx.clone(), json!({"tabId": tab}))
            .await
            .unwrap();
        browser.set_command_result(
            "Runtime.evaluate",
            json!({"result": {}, "exceptionDetails": {"exception": {"description": "ReferenceError: x is not defined"}}}),
        );
        let err = DebugExecuteHandler
            .execute(ctx, json!({"tabId": tab, "command": "x"}))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Browser error: ReferenceError: x is not defined");
    }

    #[tokio::test]
    async fn test_inject_by_session() {
        let (ctx, browser, _events) = HandlerContext::in_memory();
        let tab = browser.seed_tab("https://a.com", "A");
        let summary = DebugEnableHandler
            .execute(ctx.clone(), json!({"tabId": tab}))
            .await
            .unwrap();
        let injected = DebugInjectHandler
            .execute(
                ctx.clone(),
                json!({"sessionId": summary["sessionId"], "script": "window.x = 1"}),
            )
            .await
            .unwrap();
        assert!(injected["identifier"].is_string());
        assert!(browser
            .command_log()
            .iter()
            .any(|(_, method, _)| method == "Page.addScriptToEvaluateOnNewDocument"));
    }

    #[tokio::test]
    async fn test_enable_unknown_tab_leaves_no_session() {
        let (ctx, _browser, _events) = HandlerContext::in_memory();
        assert!(DebugEnableHandler
            .execute(ctx.clone(), json!({"tabId": 404}))
            .await
            .is_err());
        assert!(ctx.sessions.is_empty());
    }

    #[tokio::test]
    async fn test_enable_for_tab_closed_during_attach_leaves_no_session() {
        let (ctx, browser, _events) = crate::testing::context_with_closing_debugger();
        let tab = browser.seed_tab("https://a.com", "A");
        let err = DebugEnableHandler
            .execute(ctx.clone(), json!({"tabId": tab}))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), format!("Not found: tab {}", tab));
        assert!(ctx.sessions.is_empty());
        assert!(!browser.is_attached(tab));
        assert_eq!(browser.debug_listener_count(), 0);
        assert!(browser
            .command_log()
            .iter()
            .all(|(_, method, _)| method != "Page.enable"));
    }
}
