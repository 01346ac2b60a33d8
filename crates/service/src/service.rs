use skylink_core::host::{DebugEvent, Host, Subscription, TabEvent};
use skylink_core::{Config, ConnectionState, Error, Result, SessionKind};
use skylink_handlers::{HandlerContext, HandlerRegistry};
use skylink_storage::SessionRegistry;
use skylink_transport::{Connector, Transport, TransportConfig};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::emitter::{ContentEvent, Emitter};
use crate::router::Router;

/// Receivers handed to the loops on start.
struct Pending {
    inbound: mpsc::UnboundedReceiver<String>,
    debug_events: mpsc::UnboundedReceiver<DebugEvent>,
    content_events: mpsc::UnboundedReceiver<ContentEvent>,
}

struct Running {
    shutdown: broadcast::Sender<()>,
    tasks: Vec<JoinHandle<()>>,
    _tab_subscription: Subscription,
}

/// The background bridge: gateway connection, command router and event
/// emitter over one set of browser collaborators.
///
/// A service starts once; build a new one to run again.
pub struct BridgeService {
    config: Config,
    host: Host,
    registry: Arc<HandlerRegistry>,
    sessions: Arc<SessionRegistry>,
    transport: Arc<Transport>,
    debug_tx: mpsc::UnboundedSender<DebugEvent>,
    content_tx: mpsc::UnboundedSender<ContentEvent>,
    pending: Mutex<Option<Pending>>,
    running: Mutex<Option<Running>>,
}

impl BridgeService {
    pub fn new(config: Config, host: Host, connector: Arc<dyn Connector>) -> Result<Self> {
        config.validate()?;
        let registry = Arc::new(HandlerRegistry::with_defaults()?);
        let (transport, inbound) = Transport::new(
            TransportConfig::from_config(&config, registry.capabilities()),
            connector,
        );
        let (debug_tx, debug_events) = mpsc::unbounded_channel();
        let (content_tx, content_events) = mpsc::unbounded_channel();

        Ok(Self {
            sessions: Arc::new(SessionRegistry::new(config.sessions.max_log_entries)),
            config,
            host,
            registry,
            transport,
            debug_tx,
            content_tx,
            pending: Mutex::new(Some(Pending {
                inbound,
                debug_events,
                content_events,
            })),
            running: Mutex::new(None),
        })
    }

    /// Subscribe to tab events, spawn the router and emitter, and connect.
    pub async fn start(&self) -> Result<()> {
        let pending = lock(&self.pending)
            .take()
            .ok_or_else(|| Error::Other("Service already started".to_string()))?;

        let (shutdown, _) = broadcast::channel(1);
        let (tab_tx, tab_events) = mpsc::unbounded_channel::<TabEvent>();
        let tab_subscription = self.host.tabs.subscribe(tab_tx);

        let ctx = HandlerContext {
            host: self.host.clone(),
            sessions: self.sessions.clone(),
            connection: self.transport.subscribe_state(),
            version: self.config.extension.version.clone(),
            debug_events: self.debug_tx.clone(),
        };
        let router = Router::new(
            self.registry.clone(),
            ctx,
            self.transport.clone(),
            self.config.router.handler_timeout(),
        );
        let emitter = Emitter::new(self.sessions.clone(), self.host.clone(), self.transport.clone());

        let tasks = vec![
            tokio::spawn(router.run_loop(pending.inbound, shutdown.subscribe())),
            tokio::spawn(emitter.run_loop(
                tab_events,
                pending.debug_events,
                pending.content_events,
                shutdown.subscribe(),
            )),
        ];

        *lock(&self.running) = Some(Running {
            shutdown,
            tasks,
            _tab_subscription: tab_subscription,
        });

        info!(
            url = %self.config.gateway.url,
            actions = self.registry.len(),
            "Bridge service starting"
        );
        self.transport.connect().await;
        Ok(())
    }

    /// Disconnect, stop the loops and end every session. Safe to call twice.
    pub async fn stop(&self) {
        let Some(running) = lock(&self.running).take() else {
            debug!("Bridge service not running");
            return;
        };
        self.transport.disconnect();
        let _ = running.shutdown.send(());
        for task in running.tasks {
            if let Err(e) = task.await {
                debug!(error = %e, "Service task ended abnormally");
            }
        }

        for record in self.sessions.clear() {
            if record.kind == SessionKind::Debug {
                if let Err(e) = self.host.debugger.detach(record.owner_tab_id).await {
                    debug!(tab_id = record.owner_tab_id, error = %e, "Detach on shutdown");
                }
            }
        }
        info!("Bridge service stopped");
    }

    pub fn state(&self) -> ConnectionState {
        self.transport.state()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.transport.subscribe_state()
    }

    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    pub fn transport(&self) -> &Arc<Transport> {
        &self.transport
    }

    /// Entry point for content-page signals.
    pub fn content_events(&self) -> mpsc::UnboundedSender<ContentEvent> {
        self.content_tx.clone()
    }

    pub fn is_running(&self) -> bool {
        lock(&self.running).is_some()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
