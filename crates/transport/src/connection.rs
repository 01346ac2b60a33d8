//! Gateway connection lifecycle: connect, heartbeat, reconnect.

use skylink_core::config::ReconnectConfig;
use skylink_core::message::{ControlFrame, Outbound};
use skylink_core::{Config, ConnectionState};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::connector::{Connector, SocketEvent};

#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub url: String,
    pub heartbeat_interval: Duration,
    pub reconnect: ReconnectConfig,
    /// Announced in the hello frame.
    pub capabilities: Vec<String>,
    pub version: String,
}

impl TransportConfig {
    pub fn from_config(config: &Config, capabilities: Vec<String>) -> Self {
        Self {
            url: config.gateway.url.clone(),
            heartbeat_interval: config.heartbeat_interval(),
            reconnect: config.reconnect.clone(),
            capabilities,
            version: config.extension.version.clone(),
        }
    }
}

#[derive(Default)]
struct Inner {
    /// Bumped on every connect attempt and on disconnect. Events carrying an
    /// older generation belong to a dead socket.
    generation: u64,
    /// Set by `disconnect()`, cleared by the next explicit `connect()`.
    stopped: bool,
    outgoing: Option<mpsc::UnboundedSender<String>>,
    reader: Option<JoinHandle<()>>,
    heartbeat: Option<JoinHandle<()>>,
    reconnect: Option<JoinHandle<()>>,
    consecutive_failures: u32,
}

/// One logical connection to the gateway.
///
/// Inbound text frames are forwarded, in arrival order, to the receiver returned
/// by [`Transport::new`]. The connection state is published through a watch
/// channel and only ever written here.
pub struct Transport {
    config: TransportConfig,
    connector: Arc<dyn Connector>,
    state: watch::Sender<ConnectionState>,
    inbound: mpsc::UnboundedSender<String>,
    inner: Mutex<Inner>,
}

impl Transport {
    pub fn new(
        config: TransportConfig,
        connector: Arc<dyn Connector>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<String>) {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (inbound, inbound_rx) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            config,
            connector,
            state,
            inbound,
            inner: Mutex::new(Inner::default()),
        });
        (transport, inbound_rx)
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Whether a reconnect timer is pending.
    pub fn reconnect_pending(&self) -> bool {
        self.lock().reconnect.is_some()
    }

    /// Open the socket unless already connected or connecting.
    pub async fn connect(self: &Arc<Self>) {
        self.open(None).await
    }

    /// Shared by explicit connects and reconnect timers. A timer passes the
    /// generation it was scheduled for and gives up if anything moved since.
    async fn open(self: &Arc<Self>, scheduled_for: Option<u64>) {
        let generation = {
            let mut inner = self.lock();
            if let Some(expected) = scheduled_for {
                if inner.stopped || inner.generation != expected {
                    debug!("Reconnect timer superseded");
                    return;
                }
            }
            if self.state().is_active() {
                debug!(state = %self.state(), "Connect ignored");
                return;
            }
            inner.stopped = false;
            inner.generation += 1;
            // A timer from an older generation would be rejected when it fires.
            if let Some(timer) = inner.reconnect.take() {
                timer.abort();
            }
            self.state.send_replace(ConnectionState::Connecting);
            inner.generation
        };

        info!(url = %self.config.url, "Connecting to gateway");
        let result = self.connector.connect(&self.config.url).await;

        let handle = match result {
            Ok(handle) => handle,
            Err(e) => {
                warn!(url = %self.config.url, error = %e, "Gateway connection failed");
                self.connection_lost(generation, ConnectionState::Error);
                return;
            }
        };

        {
            let mut inner = self.lock();
            if inner.generation != generation {
                debug!("Discarding socket from superseded connect");
                return;
            }
            if let Some(timer) = inner.reconnect.take() {
                timer.abort();
            }
            inner.consecutive_failures = 0;
            inner.outgoing = Some(handle.outgoing);
            inner.reader = Some(self.spawn_reader(generation, handle.incoming));
            inner.heartbeat = Some(self.spawn_heartbeat(generation));
            self.state.send_replace(ConnectionState::Connected);
        }
        info!(url = %self.config.url, "Gateway connection open");

        let hello = ControlFrame::Hello {
            capabilities: self.config.capabilities.clone(),
            version: self.config.version.clone(),
        };
        if !self.send(&hello.into()) {
            warn!("Failed to queue hello frame");
        }
    }

    /// Tear the connection down. Never triggers a reconnect; safe to repeat.
    pub fn disconnect(&self) {
        let mut inner = self.lock();
        inner.stopped = true;
        inner.generation += 1;
        inner.consecutive_failures = 0;
        for task in [
            inner.reconnect.take(),
            inner.heartbeat.take(),
            inner.reader.take(),
        ]
        .into_iter()
        .flatten()
        {
            task.abort();
        }
        let was_open = inner.outgoing.take().is_some();
        self.state.send_replace(ConnectionState::Disconnected);
        if was_open {
            info!("Disconnected from gateway");
        }
    }

    /// Queue an envelope on the open socket. `false` when nothing is open or
    /// the envelope cannot be encoded; `true` says nothing about delivery.
    pub fn send(&self, message: &Outbound) -> bool {
        let frame = match message.to_frame() {
            Ok(frame) => frame,
            Err(e) => {
                error!(kind = %message.kind(), error = %e, "Failed to encode frame");
                return false;
            }
        };
        let inner = self.lock();
        match &inner.outgoing {
            Some(tx) => tx.send(frame).is_ok(),
            None => {
                debug!(kind = %message.kind(), "Socket not open, dropping frame");
                false
            }
        }
    }

    /// Handle the socket of `generation` going away without being asked to.
    fn connection_lost(self: &Arc<Self>, generation: u64, next: ConnectionState) {
        let mut inner = self.lock();
        if inner.generation != generation || inner.stopped {
            return;
        }
        if !self.state().is_active() {
            debug!(state = %self.state(), "Connection already down");
            return;
        }
        if let Some(heartbeat) = inner.heartbeat.take() {
            heartbeat.abort();
        }
        // The reader may be the caller; let it finish on its own.
        inner.reader.take();
        inner.outgoing = None;
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        self.state.send_replace(next);

        if inner.reconnect.is_some() {
            debug!("Reconnect already scheduled");
            return;
        }
        let delay = self
            .config
            .reconnect
            .delay_for(inner.consecutive_failures.saturating_sub(1));
        info!(delay_secs = delay.as_secs(), state = %next, "Connection lost, reconnect scheduled");
        let this = self.clone();
        inner.reconnect = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            this.lock().reconnect = None;
            this.open(Some(generation)).await;
        }));
    }

    fn spawn_reader(
        self: &Arc<Self>,
        generation: u64,
        mut incoming: mpsc::UnboundedReceiver<SocketEvent>,
    ) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            while let Some(event) = incoming.recv().await {
                match event {
                    SocketEvent::Frame(frame) => {
                        if this.lock().generation != generation {
                            return;
                        }
                        if this.inbound.send(frame).is_err() {
                            debug!("Inbound receiver dropped");
                            return;
                        }
                    }
                    SocketEvent::Closed => {
                        info!("Gateway closed the connection");
                        this.connection_lost(generation, ConnectionState::Disconnected);
                        return;
                    }
                    SocketEvent::Error(reason) => {
                        error!(error = %reason, "Gateway socket error");
                        this.connection_lost(generation, ConnectionState::Error);
                        return;
                    }
                }
            }
            // Event stream ended without a close frame.
            this.connection_lost(generation, ConnectionState::Disconnected);
        })
    }

    fn spawn_heartbeat(self: &Arc<Self>, generation: u64) -> JoinHandle<()> {
        let this = Arc::downgrade(self);
        let period = self.config.heartbeat_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                ticker.tick().await;
                let Some(this) = this.upgrade() else {
                    return;
                };
                if this.lock().generation != generation {
                    return;
                }
                if this.send(&ControlFrame::Ping.into()) {
                    debug!("Heartbeat sent");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::{GatewaySocket, MemoryConnector};
    use serde_json::json;

    fn test_config() -> TransportConfig {
        TransportConfig {
            url: "ws://gateway.test/extension".into(),
            heartbeat_interval: Duration::from_secs(30),
            reconnect: ReconnectConfig {
                delay_secs: 5,
                backoff: false,
                max_delay_secs: 60,
            },
            capabilities: vec!["bookmarks".into(), "tabs".into()],
            version: "1.0.0".into(),
        }
    }

    fn setup() -> (
        Arc<Transport>,
        mpsc::UnboundedReceiver<String>,
        Arc<MemoryConnector>,
        mpsc::UnboundedReceiver<GatewaySocket>,
    ) {
        let (connector, accepted) = MemoryConnector::new();
        let connector = Arc::new(connector);
        let (transport, inbound) = Transport::new(test_config(), connector.clone());
        (transport, inbound, connector, accepted)
    }

    /// Let spawned tasks run without advancing the paused clock.
    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_hello_sent_on_open() {
        let (transport, _inbound, _connector, mut accepted) = setup();
        transport.connect().await;
        assert_eq!(transport.state(), ConnectionState::Connected);

        let mut gateway = accepted.recv().await.unwrap();
        assert_eq!(
            gateway.recv_json().await.unwrap(),
            json!({"type": "extension.hello", "capabilities": ["bookmarks", "tabs"], "version": "1.0.0"})
        );
    }

    #[tokio::test]
    async fn test_connect_while_connected_is_noop() {
        let (transport, _inbound, connector, _accepted) = setup();
        transport.connect().await;
        transport.connect().await;
        assert_eq!(connector.attempts().len(), 1);
    }

    #[tokio::test]
    async fn test_disconnect_twice() {
        let (transport, _inbound, _connector, mut accepted) = setup();
        transport.connect().await;
        let mut gateway = accepted.recv().await.unwrap();

        transport.disconnect();
        transport.disconnect();
        assert_eq!(transport.state(), ConnectionState::Disconnected);
        assert!(!transport.reconnect_pending());
        assert!(!transport.send(&ControlFrame::Ping.into()));

        gateway.recv_frame().await; // hello
        assert_eq!(gateway.recv_frame().await, None);
    }

    #[tokio::test]
    async fn test_inbound_frames_forwarded_in_order() {
        let (transport, mut inbound, _connector, mut accepted) = setup();
        transport.connect().await;
        let gateway = accepted.recv().await.unwrap();
        gateway.send_frame("one");
        gateway.send_frame("two");
        assert_eq!(inbound.recv().await.as_deref(), Some("one"));
        assert_eq!(inbound.recv().await.as_deref(), Some("two"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_loss_schedules_one_reconnect() {
        let (transport, _inbound, connector, mut accepted) = setup();
        transport.connect().await;
        let gateway = accepted.recv().await.unwrap();

        let generation = transport.lock().generation;
        transport.connection_lost(generation, ConnectionState::Error);
        transport.connection_lost(generation, ConnectionState::Disconnected);
        gateway.fail("reset");
        settle().await;

        assert!(transport.reconnect_pending());
        assert_eq!(transport.state(), ConnectionState::Error);

        tokio::time::sleep(Duration::from_secs(6)).await;
        settle().await;
        assert_eq!(connector.attempts().len(), 2);
        assert_eq!(transport.state(), ConnectionState::Connected);
        assert!(accepted.recv().await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_close_reconnects_after_delay() {
        let (transport, _inbound, connector, mut accepted) = setup();
        transport.connect().await;
        let gateway = accepted.recv().await.unwrap();
        gateway.close();
        settle().await;
        assert_eq!(transport.state(), ConnectionState::Disconnected);

        tokio::time::sleep(Duration::from_secs(4)).await;
        settle().await;
        assert_eq!(connector.attempts().len(), 1);

        tokio::time::sleep(Duration::from_secs(2)).await;
        settle().await;
        assert_eq!(connector.attempts().len(), 2);
        assert_eq!(transport.state(), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_connect_enters_error_and_retries() {
        let (transport, _inbound, connector, _accepted) = setup();
        connector.refuse_next("refused");
        transport.connect().await;
        assert_eq!(transport.state(), ConnectionState::Error);
        assert!(transport.reconnect_pending());

        tokio::time::sleep(Duration::from_secs(6)).await;
        settle().await;
        assert_eq!(transport.state(), ConnectionState::Connected);
        assert!(!transport.reconnect_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_connect_failure_keeps_retrying() {
        let (transport, _inbound, connector, _accepted) = setup();
        connector.refuse_next("refused");
        transport.connect().await;
        assert!(transport.reconnect_pending());

        connector.refuse_next("refused again");
        transport.connect().await;
        assert_eq!(transport.state(), ConnectionState::Error);
        assert!(transport.reconnect_pending());

        tokio::time::sleep(Duration::from_secs(120)).await;
        settle().await;
        assert_eq!(connector.attempts().len(), 3);
        assert_eq!(transport.state(), ConnectionState::Connected);
        assert!(!transport.reconnect_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_cancels_pending_reconnect() {
        let (transport, _inbound, connector, _accepted) = setup();
        connector.refuse_next("refused");
        transport.connect().await;
        assert!(transport.reconnect_pending());

        transport.disconnect();
        tokio::time::sleep(Duration::from_secs(30)).await;
        settle().await;
        assert_eq!(connector.attempts().len(), 1);
        assert_eq!(transport.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_pings_while_connected() {
        let (transport, _inbound, _connector, mut accepted) = setup();
        transport.connect().await;
        let mut gateway = accepted.recv().await.unwrap();
        gateway.recv_frame().await; // hello

        tokio::time::sleep(Duration::from_secs(31)).await;
        settle().await;
        assert_eq!(gateway.try_recv_frame().as_deref(), Some(r#"{"type":"ping"}"#));
        assert_eq!(gateway.try_recv_frame(), None);

        tokio::time::sleep(Duration::from_secs(30)).await;
        settle().await;
        assert_eq!(gateway.try_recv_frame().as_deref(), Some(r#"{"type":"ping"}"#));
    }

    #[tokio::test]
    async fn test_state_changes_are_observable() {
        let (transport, _inbound, _connector, _accepted) = setup();
        let mut state = transport.subscribe_state();
        assert_eq!(*state.borrow(), ConnectionState::Disconnected);
        transport.connect().await;
        state.changed().await.unwrap();
        assert_eq!(*state.borrow_and_update(), ConnectionState::Connected);
    }
}
