//! Inbound frame dispatch.
//!
//! Frames are parsed and looked up in arrival order; each command then runs on
//! its own task so a slow handler never holds up the next frame.

use skylink_core::{CommandEnvelope, Inbound, Outbound, ResponseEnvelope};
use skylink_handlers::{HandlerContext, HandlerRegistry};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::OutboundSink;

#[derive(Clone)]
pub struct Router {
    registry: Arc<HandlerRegistry>,
    ctx: HandlerContext,
    sink: Arc<dyn OutboundSink>,
    handler_timeout: Option<Duration>,
}

impl Router {
    pub fn new(
        registry: Arc<HandlerRegistry>,
        ctx: HandlerContext,
        sink: Arc<dyn OutboundSink>,
        handler_timeout: Option<Duration>,
    ) -> Self {
        Self {
            registry,
            ctx,
            sink,
            handler_timeout,
        }
    }

    pub async fn run_loop(
        self,
        mut inbound: mpsc::UnboundedReceiver<String>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        info!(actions = self.registry.len(), "Command router started");
        loop {
            tokio::select! {
                frame = inbound.recv() => {
                    match frame {
                        Some(frame) => self.handle(&frame),
                        None => {
                            debug!("Inbound stream closed");
                            break;
                        }
                    }
                }
                _ = shutdown.recv() => {
                    info!("Command router shutting down");
                    break;
                }
            }
        }
    }

    /// Route one raw frame. Never fails; problems become failure responses or
    /// log lines.
    pub fn handle(&self, raw: &str) {
        let command = match Inbound::parse(raw) {
            Ok(Inbound::Command(command)) => command,
            Ok(Inbound::Control { kind, .. }) => {
                debug!(kind = %kind, "Gateway control frame");
                return;
            }
            Ok(Inbound::MissingAction { request_id }) => {
                match request_id {
                    Some(request_id) => {
                        warn!("Command without action");
                        self.reply(ResponseEnvelope::fail("", Some(request_id), "Action required"));
                    }
                    None => debug!("Dropping frame without action or requestId"),
                }
                return;
            }
            Err(e) => {
                warn!(error = %e, "Dropping unparseable frame");
                return;
            }
        };

        if self.registry.get(&command.action).is_none() {
            warn!(action = %command.action, "Unknown action");
            self.reply(ResponseEnvelope::unknown_action(&command));
            return;
        }

        let router = self.clone();
        tokio::spawn(async move {
            let response = router.dispatch(command).await;
            router.reply(response);
        });
    }

    /// Validate and execute one command, producing its response.
    pub async fn dispatch(&self, command: CommandEnvelope) -> ResponseEnvelope {
        let CommandEnvelope {
            action,
            request_id,
            payload,
        } = command;
        let Some(handler) = self.registry.get(&action).cloned() else {
            return ResponseEnvelope::fail(&action, request_id, format!("Unknown action: {}", action));
        };
        let params = serde_json::Value::Object(payload);

        if let Err(e) = handler.validate(&params) {
            debug!(action = %action, error = %e, "Validation failed");
            return ResponseEnvelope::fail(&action, request_id, e.to_string());
        }

        debug!(action = %action, "Executing");
        let execution = handler.execute(self.ctx.clone(), params);
        let result = match self.handler_timeout {
            Some(limit) => match tokio::time::timeout(limit, execution).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(action = %action, timeout_secs = limit.as_secs(), "Handler timed out");
                    return ResponseEnvelope::fail(
                        &action,
                        request_id,
                        format!("Action {} timed out after {}s", action, limit.as_secs()),
                    );
                }
            },
            None => execution.await,
        };

        match result {
            Ok(data) => ResponseEnvelope::ok(&action, request_id, data),
            Err(e) => {
                warn!(action = %action, error = %e, "Action failed");
                ResponseEnvelope::fail(&action, request_id, e.to_string())
            }
        }
    }

    fn reply(&self, response: ResponseEnvelope) {
        let action = response.action.clone();
        if !self.sink.send(&Outbound::from(response)) {
            debug!(action = %action, "Response dropped, gateway not connected");
        }
    }
}
