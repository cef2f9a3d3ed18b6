//! Broker coordinator
//!
//! [`MqttBroker`] owns every piece of shared state: configuration, the
//! session registry, the router, the authorization provider, the optional
//! persistence backend and the statistics. It is created once at startup,
//! spawns one [`ClientHandler`] task per accepted connection and tears
//! everything down when the shutdown signal fires.

use crate::broker::auth::{AllowAllAuthProvider, AuthProvider};
use crate::broker::client_handler::ClientHandler;
use crate::broker::config::BrokerConfig;
use crate::broker::router::MessageRouter;
use crate::broker::session::SessionRegistry;
use crate::broker::stats::BrokerStats;
use crate::broker::storage::StorageBackend;
use crate::error::{MqttError, Result};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Shared state handed to every connection task.
#[derive(Clone)]
pub(crate) struct AcceptLoopState {
    pub(crate) config: Arc<BrokerConfig>,
    pub(crate) router: Arc<MessageRouter>,
    pub(crate) sessions: Arc<SessionRegistry>,
    pub(crate) auth_provider: Arc<dyn AuthProvider>,
    pub(crate) storage: Option<Arc<dyn StorageBackend>>,
    pub(crate) stats: Arc<BrokerStats>,
    pub(crate) shutdown_tx: broadcast::Sender<()>,
    next_connection_id: Arc<AtomicU64>,
    active_connections: Arc<AtomicUsize>,
}

impl AcceptLoopState {
    /// Spawns a handler task for a new connection, or drops the stream when
    /// the broker is at `max_clients`.
    fn spawn_connection<S>(&self, stream: S, client_addr: Option<SocketAddr>) -> Option<JoinHandle<()>>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let active = self.active_connections.fetch_add(1, Ordering::AcqRel);
        if active >= self.config.max_clients {
            self.active_connections.fetch_sub(1, Ordering::AcqRel);
            warn!(addr = ?client_addr, max_clients = self.config.max_clients, "Connection limit reached, rejecting connection");
            return None;
        }

        let connection_id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
        let handler = ClientHandler::new(stream, client_addr, connection_id, self);
        let active_connections = Arc::clone(&self.active_connections);

        Some(tokio::spawn(async move {
            if let Err(e) = handler.run().await {
                if e.is_normal_disconnect() {
                    debug!("Client disconnect: {e}");
                } else {
                    warn!("Client handler error: {e}");
                }
            }
            active_connections.fetch_sub(1, Ordering::AcqRel);
        }))
    }

    /// Drops detached sessions that outlived `session_expiry_interval`.
    async fn purge_expired_sessions(&self) -> usize {
        let expired = self
            .sessions
            .purge_expired(self.config.session_expiry_interval);
        for session in &expired {
            self.router
                .remove_session_subscriptions(&session.client_id, session.generation)
                .await;
            if let Some(ref storage) = self.storage {
                if let Err(e) = storage.remove_session(&session.client_id).await {
                    warn!(client_id = %session.client_id, "Failed to remove expired session: {e}");
                }
            }
        }
        expired.len()
    }
}

/// Binds every address it can. Fails only when none could be bound.
async fn bind_listeners(addrs: &[SocketAddr]) -> Result<Vec<TcpListener>> {
    let mut listeners = Vec::new();
    let mut failures = Vec::new();

    for addr in addrs {
        match TcpListener::bind(addr).await {
            Ok(listener) => {
                let local = listener.local_addr().unwrap_or(*addr);
                info!(addr = %local, "MQTT broker listening");
                listeners.push(listener);
            }
            Err(e) => {
                warn!(addr = %addr, "Failed to bind: {e}");
                let hint = match e.kind() {
                    std::io::ErrorKind::AddrInUse => " (port already in use)",
                    std::io::ErrorKind::PermissionDenied => " (ports below 1024 need privileges)",
                    _ => "",
                };
                failures.push(format!("{addr}: {e}{hint}"));
            }
        }
    }

    if listeners.is_empty() {
        let detail = if failures.is_empty() {
            "no bind addresses configured".to_string()
        } else {
            failures.join("; ")
        };
        return Err(MqttError::Configuration(format!(
            "Failed to bind to any address: {detail}"
        )));
    }
    Ok(listeners)
}

pub struct MqttBroker {
    state: AcceptLoopState,
    listeners: Vec<TcpListener>,
    shutdown_rx: Option<broadcast::Receiver<()>>,
}

impl MqttBroker {
    /// Creates a broker listening on a single address.
    pub async fn bind(addr: impl AsRef<str>) -> Result<Self> {
        let addr = addr
            .as_ref()
            .parse::<SocketAddr>()
            .map_err(|e| MqttError::Configuration(format!("Invalid address: {e}")))?;

        Self::with_config(BrokerConfig::default().with_bind_address(addr)).await
    }

    /// Creates a broker and binds every configured address.
    pub async fn with_config(config: BrokerConfig) -> Result<Self> {
        let mut broker = Self::new(config)?;

        let addresses = broker.state.config.bind_addresses.clone();
        broker.listeners = bind_listeners(&addresses).await?;
        Ok(broker)
    }

    /// Creates a broker without listeners. Connections are handed in with
    /// [`MqttBroker::serve_connection`].
    pub fn new(config: BrokerConfig) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);
        let sessions = Arc::new(SessionRegistry::new());
        let stats = Arc::new(BrokerStats::new());
        let router = Arc::new(Self::build_router(&config, &sessions, &stats, None));
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        Ok(Self {
            state: AcceptLoopState {
                config,
                router,
                sessions,
                auth_provider: Arc::new(AllowAllAuthProvider),
                storage: None,
                stats,
                shutdown_tx,
                next_connection_id: Arc::new(AtomicU64::new(1)),
                active_connections: Arc::new(AtomicUsize::new(0)),
            },
            listeners: Vec::new(),
            shutdown_rx: Some(shutdown_rx),
        })
    }

    fn build_router(
        config: &BrokerConfig,
        sessions: &Arc<SessionRegistry>,
        stats: &Arc<BrokerStats>,
        storage: Option<Arc<dyn StorageBackend>>,
    ) -> MessageRouter {
        let router = MessageRouter::new(Arc::clone(sessions))
            .with_stats(Arc::clone(stats))
            .with_max_queued_messages(config.max_queued_messages)
            .with_retain_available(config.retain_available);
        match storage {
            Some(storage) => router.with_storage(storage),
            None => router,
        }
    }

    #[must_use]
    pub fn with_auth_provider(mut self, provider: Arc<dyn AuthProvider>) -> Self {
        self.state.auth_provider = provider;
        self
    }

    /// Attaches persistence hooks. Call before the broker serves clients.
    #[must_use]
    pub fn with_storage(mut self, storage: Arc<dyn StorageBackend>) -> Self {
        self.state.router = Arc::new(Self::build_router(
            &self.state.config,
            &self.state.sessions,
            &self.state.stats,
            Some(Arc::clone(&storage)),
        ));
        self.state.storage = Some(storage);
        self
    }

    /// Loads retained messages from storage.
    pub async fn initialize(&self) -> Result<()> {
        self.state.router.initialize().await
    }

    /// Serves one already accepted byte stream. Returns `None` when the
    /// connection was refused because the broker is full.
    pub fn serve_connection<S>(&self, stream: S, client_addr: Option<SocketAddr>) -> Option<JoinHandle<()>>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        self.state.spawn_connection(stream, client_addr)
    }

    /// Runs the accept loops until [`MqttBroker::shutdown`] is called.
    pub async fn run(&mut self) -> Result<()> {
        let Some(mut shutdown_rx) = self.shutdown_rx.take() else {
            return Err(MqttError::Configuration("Broker already running".to_string()));
        };
        let listeners = std::mem::take(&mut self.listeners);
        if listeners.is_empty() {
            return Err(MqttError::Configuration("No listeners bound".to_string()));
        }

        info!("Starting MQTT broker");
        self.initialize().await?;

        let mut task_handles: Vec<JoinHandle<()>> = Vec::new();
        if let Some(handle) = self.spawn_session_expiry_task() {
            task_handles.push(handle);
        }

        for listener in listeners {
            let state = self.state.clone();
            let mut shutdown_rx_accept = state.shutdown_tx.subscribe();
            task_handles.push(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        accept_result = listener.accept() => {
                            match accept_result {
                                Ok((stream, addr)) => {
                                    debug!(addr = %addr, "Accepted connection");
                                    if let Err(e) = stream.set_nodelay(true) {
                                        debug!("Failed to set TCP_NODELAY: {e}");
                                    }
                                    state.spawn_connection(stream, Some(addr));
                                }
                                Err(e) => {
                                    error!("Accept error: {e}");
                                }
                            }
                        }
                        _ = shutdown_rx_accept.recv() => {
                            debug!("Accept loop shutting down");
                            break;
                        }
                    }
                }
            }));
        }

        let _ = shutdown_rx.recv().await;
        info!("Broker shutting down");
        // Tasks subscribed after an early signal still have to see one
        let _ = self.state.shutdown_tx.send(());
        for handle in task_handles {
            let _ = handle.await;
        }
        Ok(())
    }

    fn spawn_session_expiry_task(&self) -> Option<JoinHandle<()>> {
        let expiry = self.state.config.session_expiry_interval;
        if expiry.is_zero() {
            return None;
        }
        let period = expiry.min(Duration::from_secs(60)).max(Duration::from_secs(1));
        let state = self.state.clone();
        let mut shutdown_rx = state.shutdown_tx.subscribe();

        Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let purged = state.purge_expired_sessions().await;
                        if purged > 0 {
                            info!(count = purged, "Purged expired sessions");
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        debug!("Session expiry task shutting down");
                        break;
                    }
                }
            }
        }))
    }

    /// Runs one session expiry pass and returns how many sessions were
    /// removed.
    pub async fn purge_expired_sessions(&self) -> usize {
        self.state.purge_expired_sessions().await
    }

    /// Signals every connection and accept loop to stop.
    pub fn shutdown(&self) {
        let _ = self.state.shutdown_tx.send(());
    }

    /// Sender for the shutdown signal, usable after `run` took the broker.
    #[must_use]
    pub fn shutdown_sender(&self) -> broadcast::Sender<()> {
        self.state.shutdown_tx.clone()
    }

    #[must_use]
    pub fn stats(&self) -> Arc<BrokerStats> {
        Arc::clone(&self.state.stats)
    }

    #[must_use]
    pub fn router(&self) -> Arc<MessageRouter> {
        Arc::clone(&self.state.router)
    }

    #[must_use]
    pub fn sessions(&self) -> Arc<SessionRegistry> {
        Arc::clone(&self.state.sessions)
    }

    #[must_use]
    pub fn config(&self) -> &BrokerConfig {
        &self.state.config
    }

    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listeners.first()?.local_addr().ok()
    }

    #[must_use]
    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        self.listeners
            .iter()
            .filter_map(|listener| listener.local_addr().ok())
            .collect()
    }
}
