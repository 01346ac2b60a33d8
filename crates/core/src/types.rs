use serde::{Deserialize, Serialize};
use std::fmt;

/// Browser tab handle.
pub type TabId = i64;

/// Browser window handle.
pub type WindowId = i64;

/// Lifecycle of the gateway connection. Only the transport writes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Error => "error",
        }
    }

    /// Connected or on the way there.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Connecting | Self::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionKind {
    SharedTab,
    Debug,
}

impl SessionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SharedTab => "sharedTab",
            Self::Debug => "debug",
        }
    }
}

impl fmt::Display for SessionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_state_wire_names() {
        assert_eq!(
            serde_json::to_value(ConnectionState::Connecting).unwrap(),
            serde_json::json!("connecting")
        );
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
        assert!(ConnectionState::Connected.is_active());
        assert!(!ConnectionState::Error.is_active());
    }

    #[test]
    fn test_session_kind_wire_names() {
        assert_eq!(
            serde_json::to_value(SessionKind::SharedTab).unwrap(),
            serde_json::json!("sharedTab")
        );
        assert_eq!(SessionKind::Debug.to_string(), "debug");
    }
}
