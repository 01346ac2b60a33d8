//! Wire envelopes exchanged with the gateway.
//!
//! Every frame is one JSON object. Inbound frames are either commands
//! (`{action, requestId?, ...payload}`) or gateway control frames (`{type, ...}`).
//! Outbound frames are control frames (hello, ping), responses, or events.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// Inbound command. `payload` holds every field except `action` and `requestId`.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandEnvelope {
    pub action: String,
    pub request_id: Option<Value>,
    pub payload: Map<String, Value>,
}

impl CommandEnvelope {
    pub fn new(action: &str) -> Self {
        Self {
            action: action.to_string(),
            request_id: None,
            payload: Map::new(),
        }
    }

    pub fn params(&self) -> Value {
        Value::Object(self.payload.clone())
    }
}

/// A parsed inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Command(CommandEnvelope),
    /// Gateway control frame such as `{"type": "pong"}`.
    Control { kind: String, body: Map<String, Value> },
    /// An object with neither `action` nor `type`, or whose `action` is not a
    /// string.
    MissingAction { request_id: Option<Value> },
}

impl Inbound {
    pub fn parse(raw: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(raw)?;
        let Value::Object(mut map) = value else {
            return Err(Error::Protocol("frame is not a JSON object".to_string()));
        };

        let request_id = match map.remove("requestId") {
            None | Some(Value::Null) => None,
            Some(id) => Some(id),
        };

        match map.remove("action") {
            Some(Value::String(action)) if !action.is_empty() => {
                return Ok(Inbound::Command(CommandEnvelope {
                    action,
                    request_id,
                    payload: map,
                }));
            }
            Some(Value::String(_)) | Some(Value::Null) | None => {}
            Some(_) => return Ok(Inbound::MissingAction { request_id }),
        }

        if let Some(Value::String(kind)) = map.remove("type") {
            return Ok(Inbound::Control { kind, body: map });
        }

        Ok(Inbound::MissingAction { request_id })
    }
}

/// Reply to a command. `error` is always set when `success` is false.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseEnvelope {
    pub success: bool,
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ResponseEnvelope {
    pub fn ok(action: &str, request_id: Option<Value>, data: Value) -> Self {
        Self {
            success: true,
            action: action.to_string(),
            request_id,
            data: if data.is_null() { None } else { Some(data) },
            error: None,
        }
    }

    pub fn fail(action: &str, request_id: Option<Value>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            action: action.to_string(),
            request_id,
            data: None,
            error: Some(error.into()),
        }
    }

    pub fn unknown_action(command: &CommandEnvelope) -> Self {
        Self::fail(
            &command.action,
            command.request_id.clone(),
            format!("Unknown action: {}", command.action),
        )
    }
}

/// Fixed-shape frames the bridge emits on its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ControlFrame {
    #[serde(rename = "extension.hello")]
    Hello {
        capabilities: Vec<String>,
        version: String,
    },
    #[serde(rename = "ping")]
    Ping,
}

/// Uncorrelated notification: `{type, sessionId?, ...fields}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(rename = "sessionId", default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl EventEnvelope {
    pub fn new(kind: &str) -> Self {
        Self {
            kind: kind.to_string(),
            session_id: None,
            fields: Map::new(),
        }
    }

    pub fn session(mut self, session_id: &str) -> Self {
        self.session_id = Some(session_id.to_string());
        self
    }

    pub fn field(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Outbound {
    Control(ControlFrame),
    Response(ResponseEnvelope),
    Event(EventEnvelope),
}

impl Outbound {
    pub fn to_frame(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn kind(&self) -> &str {
        match self {
            Outbound::Control(ControlFrame::Hello { .. }) => "extension.hello",
            Outbound::Control(ControlFrame::Ping) => "ping",
            Outbound::Response(r) => &r.action,
            Outbound::Event(e) => &e.kind,
        }
    }
}

impl From<ControlFrame> for Outbound {
    fn from(frame: ControlFrame) -> Self {
        Outbound::Control(frame)
    }
}

impl From<ResponseEnvelope> for Outbound {
    fn from(response: ResponseEnvelope) -> Self {
        Outbound::Response(response)
    }
}

impl From<EventEnvelope> for Outbound {
    fn from(event: EventEnvelope) -> Self {
        Outbound::Event(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_command_splits_payload() {
        let inbound =
            Inbound::parse(r#"{"action":"tabs.create","requestId":"r7","url":"http://a.com","active":false}"#)
                .unwrap();
        let Inbound::Command(cmd) = inbound else {
            panic!("expected command");
        };
        assert_eq!(cmd.action, "tabs.create");
        assert_eq!(cmd.request_id, Some(json!("r7")));
        assert_eq!(cmd.params(), json!({"url": "http://a.com", "active": false}));
    }

    #[test]
    fn test_parse_control_frame() {
        let inbound = Inbound::parse(r#"{"type":"pong"}"#).unwrap();
        assert!(matches!(inbound, Inbound::Control { ref kind, .. } if kind == "pong"));
    }

    #[test]
    fn test_parse_missing_action_keeps_request_id() {
        let inbound = Inbound::parse(r#"{"requestId":42,"url":"x"}"#).unwrap();
        assert_eq!(
            inbound,
            Inbound::MissingAction {
                request_id: Some(json!(42))
            }
        );
        let inbound = Inbound::parse(r#"{"action":"","requestId":"r"}"#).unwrap();
        assert!(matches!(inbound, Inbound::MissingAction { .. }));
        let inbound = Inbound::parse(r#"{"action":5,"type":"pong","requestId":"r"}"#).unwrap();
        assert_eq!(
            inbound,
            Inbound::MissingAction {
                request_id: Some(json!("r"))
            }
        );
    }

    #[test]
    fn test_parse_rejects_non_objects() {
        assert!(matches!(Inbound::parse("not json"), Err(Error::Json(_))));
        assert!(matches!(Inbound::parse("[1,2]"), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_unknown_action_response_shape() {
        let Inbound::Command(cmd) =
            Inbound::parse(r#"{"action":"bogus.action","requestId":"r1"}"#).unwrap()
        else {
            panic!("expected command");
        };
        let frame = Outbound::from(ResponseEnvelope::unknown_action(&cmd))
            .to_frame()
            .unwrap();
        let value: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(
            value,
            json!({
                "success": false,
                "action": "bogus.action",
                "requestId": "r1",
                "error": "Unknown action: bogus.action"
            })
        );
    }

    #[test]
    fn test_response_preserves_correlation() {
        for request_id in [json!("abc"), json!(17), json!({"n": 1})] {
            let response = ResponseEnvelope::ok("status", Some(request_id.clone()), json!({"a": 1}));
            let frame = Outbound::from(response).to_frame().unwrap();
            let decoded: ResponseEnvelope = serde_json::from_str(&frame).unwrap();
            assert_eq!(decoded.action, "status");
            assert_eq!(decoded.request_id, Some(request_id));
        }
    }

    #[test]
    fn test_ok_with_null_data_omits_field() {
        let frame = Outbound::from(ResponseEnvelope::ok("bookmarks.delete", None, Value::Null))
            .to_frame()
            .unwrap();
        assert_eq!(frame, r#"{"success":true,"action":"bookmarks.delete"}"#);
    }

    #[test]
    fn test_control_frames() {
        let hello = ControlFrame::Hello {
            capabilities: vec!["bookmarks".into(), "tabs".into()],
            version: "1.0.0".into(),
        };
        let value: Value =
            serde_json::from_str(&Outbound::from(hello).to_frame().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({"type": "extension.hello", "capabilities": ["bookmarks", "tabs"], "version": "1.0.0"})
        );
        assert_eq!(
            Outbound::from(ControlFrame::Ping).to_frame().unwrap(),
            r#"{"type":"ping"}"#
        );
    }

    #[test]
    fn test_event_envelope_flattens_fields() {
        let event = EventEnvelope::new("debug.event")
            .session("s-1")
            .field("method", "Runtime.consoleAPICalled")
            .field("tabId", 4);
        let value: Value =
            serde_json::from_str(&Outbound::from(event).to_frame().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({"type": "debug.event", "sessionId": "s-1", "method": "Runtime.consoleAPICalled", "tabId": 4})
        );
    }
}
