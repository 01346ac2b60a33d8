//! Socket establishment, kept behind a trait so the connection state machine
//! can run against an in-process gateway.

use async_trait::async_trait;
use serde_json::Value;
use skylink_core::{Error, Result};
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

/// What the socket reports back to its owner.
#[derive(Debug, Clone, PartialEq)]
pub enum SocketEvent {
    Frame(String),
    /// Closed by the remote end.
    Closed,
    Error(String),
}

/// An open socket. Dropping `outgoing` closes it.
pub struct SocketHandle {
    pub outgoing: mpsc::UnboundedSender<String>,
    pub incoming: mpsc::UnboundedReceiver<SocketEvent>,
}

#[async_trait]
pub trait Connector: Send + Sync {
    /// Resolves once the socket is open.
    async fn connect(&self, url: &str) -> Result<SocketHandle>;
}

/// Websocket connector backed by tokio-tungstenite.
#[derive(Debug, Clone, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &str) -> Result<SocketHandle> {
        use futures::{SinkExt, StreamExt};
        use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};

        let url = url::Url::parse(url)
            .map_err(|e| Error::Transport(format!("Invalid gateway URL: {}", e)))?;

        let (ws_stream, _) = connect_async(url.as_str())
            .await
            .map_err(|e| Error::Transport(format!("WebSocket connection failed: {}", e)))?;

        info!(url = %url, "Connected to gateway");

        let (mut write, mut read) = ws_stream.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<SocketEvent>();

        // Writer: drains queued frames until the owner drops its sender.
        tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                if let Err(e) = write.send(WsMessage::Text(frame)).await {
                    error!(error = %e, "Failed to write frame");
                    return;
                }
            }
            debug!("Outgoing queue closed, closing socket");
            let _ = write.send(WsMessage::Close(None)).await;
            let _ = write.close().await;
        });

        // Reader
        tokio::spawn(async move {
            loop {
                let event = match read.next().await {
                    Some(Ok(WsMessage::Text(text))) => SocketEvent::Frame(text),
                    Some(Ok(WsMessage::Binary(bytes))) => match String::from_utf8(bytes) {
                        Ok(text) => SocketEvent::Frame(text),
                        Err(_) => {
                            debug!("Ignoring non-UTF-8 binary frame");
                            continue;
                        }
                    },
                    Some(Ok(WsMessage::Close(_))) | None => SocketEvent::Closed,
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => SocketEvent::Error(e.to_string()),
                };
                let terminal = !matches!(event, SocketEvent::Frame(_));
                if in_tx.send(event).is_err() || terminal {
                    break;
                }
            }
        });

        Ok(SocketHandle {
            outgoing: out_tx,
            incoming: in_rx,
        })
    }
}

/// Gateway end of a socket opened through [`MemoryConnector`].
pub struct GatewaySocket {
    pub url: String,
    from_client: mpsc::UnboundedReceiver<String>,
    to_client: mpsc::UnboundedSender<SocketEvent>,
}

impl GatewaySocket {
    /// Next frame written by the client, `None` once the client closed the socket.
    pub async fn recv_frame(&mut self) -> Option<String> {
        self.from_client.recv().await
    }

    /// Next frame decoded as JSON. Undecodable frames are skipped.
    pub async fn recv_json(&mut self) -> Option<Value> {
        loop {
            let frame = self.from_client.recv().await?;
            if let Ok(value) = serde_json::from_str(&frame) {
                return Some(value);
            }
        }
    }

    /// Non-blocking variant of [`recv_frame`](Self::recv_frame).
    pub fn try_recv_frame(&mut self) -> Option<String> {
        self.from_client.try_recv().ok()
    }

    pub fn send_frame(&self, frame: impl Into<String>) -> bool {
        self.to_client.send(SocketEvent::Frame(frame.into())).is_ok()
    }

    pub fn send_json(&self, value: &Value) -> bool {
        self.send_frame(value.to_string())
    }

    /// Simulate the gateway closing the connection.
    pub fn close(&self) {
        let _ = self.to_client.send(SocketEvent::Closed);
    }

    /// Simulate a socket error.
    pub fn fail(&self, reason: &str) {
        let _ = self.to_client.send(SocketEvent::Error(reason.to_string()));
    }
}

/// In-process connector. Each successful `connect` hands the gateway end of the
/// socket to whoever holds the receiver returned by [`MemoryConnector::new`].
pub struct MemoryConnector {
    accepted: mpsc::UnboundedSender<GatewaySocket>,
    refusals: Mutex<VecDeque<String>>,
    attempts: Mutex<Vec<String>>,
}

impl MemoryConnector {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<GatewaySocket>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                accepted: tx,
                refusals: Mutex::new(VecDeque::new()),
                attempts: Mutex::new(Vec::new()),
            },
            rx,
        )
    }

    /// Make the next connection attempt fail with `reason`.
    pub fn refuse_next(&self, reason: &str) {
        if let Ok(mut refusals) = self.refusals.lock() {
            refusals.push_back(reason.to_string());
        }
    }

    /// URLs of every connection attempt so far, refused ones included.
    pub fn attempts(&self) -> Vec<String> {
        self.attempts
            .lock()
            .map(|a| a.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, url: &str) -> Result<SocketHandle> {
        if let Ok(mut attempts) = self.attempts.lock() {
            attempts.push(url.to_string());
        }
        let refusal = self.refusals.lock().ok().and_then(|mut r| r.pop_front());
        if let Some(reason) = refusal {
            return Err(Error::Transport(reason));
        }

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        self.accepted
            .send(GatewaySocket {
                url: url.to_string(),
                from_client: out_rx,
                to_client: in_tx,
            })
            .map_err(|_| Error::Transport("connection refused".to_string()))?;
        Ok(SocketHandle {
            outgoing: out_tx,
            incoming: in_rx,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_connector_pairs_both_ends() {
        let (connector, mut accepted) = MemoryConnector::new();
        let mut handle = connector.connect("ws://gw/extension").await.unwrap();
        let mut gateway = accepted.recv().await.unwrap();
        assert_eq!(gateway.url, "ws://gw/extension");

        handle.outgoing.send("hi".into()).unwrap();
        assert_eq!(gateway.recv_frame().await.as_deref(), Some("hi"));

        gateway.send_frame("back");
        gateway.close();
        assert_eq!(handle.incoming.recv().await, Some(SocketEvent::Frame("back".into())));
        assert_eq!(handle.incoming.recv().await, Some(SocketEvent::Closed));

        drop(handle);
        assert_eq!(gateway.recv_frame().await, None);
    }

    #[tokio::test]
    async fn test_refusal_is_consumed_once() {
        let (connector, _accepted) = MemoryConnector::new();
        connector.refuse_next("nope");
        assert!(matches!(
            connector.connect("ws://gw").await,
            Err(Error::Transport(ref r)) if r == "nope"
        ));
        assert!(connector.connect("ws://gw").await.is_ok());
        assert_eq!(connector.attempts().len(), 2);
    }

    #[tokio::test]
    async fn test_ws_connector_rejects_bad_url() {
        assert!(matches!(
            WsConnector.connect("not a url").await,
            Err(Error::Transport(_))
        ));
    }
}
