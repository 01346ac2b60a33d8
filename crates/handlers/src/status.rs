use async_trait::async_trait;
use serde_json::{json, Value};
use skylink_core::{Result, SessionKind};

use crate::{Handler, HandlerContext, HandlerSchema};

pub struct StatusHandler;

#[async_trait]
impl Handler for StatusHandler {
    fn schema(&self) -> HandlerSchema {
        HandlerSchema {
            action: "status",
            capability: "status",
            description: "Report connection state, version and live session counts.",
        }
    }

    fn validate(&self, _params: &Value) -> Result<()> {
        Ok(())
    }

    async fn execute(&self, ctx: HandlerContext, _params: Value) -> Result<Value> {
        Ok(json!({
            "state": ctx.connection_state(),
            "version": ctx.version,
            "sessions": {
                "shared": ctx.sessions.count(SessionKind::SharedTab),
                "debug": ctx.sessions.count(SessionKind::Debug),
            },
        }))
    }
}
