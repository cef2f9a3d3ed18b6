//! Client connection handler for the broker
//!
//! One handler task runs per accepted connection. It owns the connection's
//! state machine and transport, attaches to the client's session after
//! CONNECT and multiplexes inbound packets, outbound deliveries, the
//! keep-alive deadline, takeover and shutdown signals. Writes race the same
//! deadline and signals, so a peer that stops reading is still closed.

mod connect;
mod lifecycle;
mod publish;
mod subscribe;

use crate::broker::auth::AuthProvider;
use crate::broker::config::BrokerConfig;
use crate::broker::router::MessageRouter;
use crate::broker::server::AcceptLoopState;
use crate::broker::session::{SessionHandle, SessionRegistry};
use crate::broker::stats::BrokerStats;
use crate::broker::storage::StorageBackend;
use crate::broker::transport::PacketStream;
use crate::connection::{CloseReason, ConnectionStateMachine};
use crate::error::{MqttError, Result};
use crate::keepalive::KeepaliveConfig;
use crate::packet::{Packet, PublishPacket};
use crate::types::WillMessage;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{broadcast, oneshot};
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};

pub struct ClientHandler<S> {
    pub(super) stream: PacketStream<S>,
    pub(super) client_addr: Option<SocketAddr>,
    pub(super) connection_id: u64,
    pub(super) config: Arc<BrokerConfig>,
    pub(super) router: Arc<MessageRouter>,
    pub(super) sessions: Arc<SessionRegistry>,
    pub(super) auth_provider: Arc<dyn AuthProvider>,
    pub(super) storage: Option<Arc<dyn StorageBackend>>,
    pub(super) stats: Arc<BrokerStats>,
    pub(super) shutdown_rx: broadcast::Receiver<()>,
    pub(super) machine: ConnectionStateMachine,
    pub(super) client_id: Option<String>,
    pub(super) session: Option<SessionHandle>,
    pub(super) generation: u64,
    pub(super) will: Option<WillMessage>,
    pub(super) last_packet_time: Instant,
    pub(super) disconnect_tx: Option<oneshot::Sender<()>>,
    pub(super) disconnect_rx: oneshot::Receiver<()>,
    pub(super) publish_tx: flume::Sender<PublishPacket>,
    pub(super) publish_rx: flume::Receiver<PublishPacket>,
}

impl<S> ClientHandler<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub(crate) fn new(
        stream: S,
        client_addr: Option<SocketAddr>,
        connection_id: u64,
        state: &AcceptLoopState,
    ) -> Self {
        let config = Arc::clone(&state.config);
        let (publish_tx, publish_rx) = flume::bounded(config.client_channel_capacity);
        let keepalive = KeepaliveConfig::new(config.keepalive_timeout_percent);
        let (disconnect_tx, disconnect_rx) = oneshot::channel();

        Self {
            stream: PacketStream::new(stream, config.max_packet_size),
            client_addr,
            connection_id,
            router: Arc::clone(&state.router),
            sessions: Arc::clone(&state.sessions),
            auth_provider: Arc::clone(&state.auth_provider),
            storage: state.storage.clone(),
            stats: Arc::clone(&state.stats),
            shutdown_rx: state.shutdown_tx.subscribe(),
            machine: ConnectionStateMachine::new(keepalive),
            client_id: None,
            session: None,
            generation: 0,
            will: None,
            last_packet_time: Instant::now(),
            disconnect_tx: Some(disconnect_tx),
            disconnect_rx,
            publish_tx,
            publish_rx,
            config,
        }
    }

    pub(super) fn session(&self) -> Result<&SessionHandle> {
        self.session
            .as_ref()
            .ok_or_else(|| MqttError::Internal("no session attached".to_string()))
    }

    pub(super) fn client_id(&self) -> &str {
        self.client_id.as_deref().unwrap_or("")
    }

    /// Runs the connection until it closes.
    ///
    /// Returns the error that closed the connection. Peer disconnects
    /// surface as errors for which [`MqttError::is_normal_disconnect`] holds.
    pub async fn run(mut self) -> Result<()> {
        debug!(
            connection_id = self.connection_id,
            addr = ?self.client_addr,
            "Client handler started"
        );

        match timeout(self.config.connect_timeout, self.wait_for_connect()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                if e.is_normal_disconnect() {
                    debug!("Client disconnected during connect phase: {e}");
                } else {
                    warn!(addr = ?self.client_addr, "Connect error: {e}");
                }
                self.close(CloseReason::from_error(&e)).await;
                return Err(e);
            }
            Err(_) => {
                warn!(addr = ?self.client_addr, "Connect timeout");
                self.close(CloseReason::ConnectTimeout).await;
                return Err(MqttError::Timeout);
            }
        }

        let result = self.handle_packets().await;
        let reason = match &result {
            Ok(reason) => reason.clone(),
            Err(e) => CloseReason::from_error(e),
        };
        self.close(reason).await;
        result.map(|_| ())
    }

    async fn handle_packets(&mut self) -> Result<CloseReason> {
        loop {
            let deadline = self.keep_alive_deadline();
            let can_send = self.has_outbound_capacity()?;

            tokio::select! {
                packet_result = self.stream.read_packet() => {
                    let packet = packet_result?;
                    self.last_packet_time = Instant::now();
                    if let Some(reason) = self.handle_packet(packet).await? {
                        return Ok(reason);
                    }
                }

                publish_result = self.publish_rx.recv_async(), if can_send => {
                    if let Ok(publish) = publish_result {
                        self.send_publish(publish).await?;
                    }
                }

                () = keep_alive_expiry(deadline) => {
                    warn!(client_id = %self.client_id(), "Keep-alive timeout");
                    return Err(MqttError::KeepAliveTimeout);
                }

                _ = &mut self.disconnect_rx => {
                    info!(client_id = %self.client_id(), "Session taken over by another connection");
                    return Ok(CloseReason::SessionTakenOver);
                }

                _ = self.shutdown_rx.recv() => {
                    debug!(client_id = %self.client_id(), "Shutdown signal received");
                    return Ok(CloseReason::ServerShutdown);
                }
            }

            self.flush_outbound().await?;
        }
    }

    fn keep_alive_deadline(&self) -> Option<Instant> {
        self.machine
            .keep_alive_timeout()
            .map(|timeout| self.last_packet_time + timeout)
    }

    /// Writes one packet to the client.
    ///
    /// Fails with [`MqttError::KeepAliveTimeout`] when the peer has not
    /// drained the write by the keep-alive deadline, and with
    /// [`MqttError::SessionTakenOver`] or [`MqttError::ServerShuttingDown`]
    /// when those signals arrive first. A partial write leaves the stream
    /// unusable, so every error closes the connection.
    pub(super) async fn write_packet(&mut self, packet: &Packet) -> Result<()> {
        let deadline = self.keep_alive_deadline();

        tokio::select! {
            result = self.stream.write_packet(packet) => result,

            () = keep_alive_expiry(deadline) => {
                warn!(client_id = %self.client_id(), "Keep-alive timeout while writing");
                Err(MqttError::KeepAliveTimeout)
            }

            _ = &mut self.disconnect_rx => {
                info!(client_id = %self.client_id(), "Session taken over while writing");
                Err(MqttError::SessionTakenOver)
            }

            _ = self.shutdown_rx.recv() => {
                debug!(client_id = %self.client_id(), "Shutdown signal received while writing");
                Err(MqttError::ServerShuttingDown)
            }
        }
    }

    /// Dispatches one inbound packet. `Some` ends the connection.
    async fn handle_packet(&mut self, packet: Packet) -> Result<Option<CloseReason>> {
        self.machine.check_inbound(packet.packet_type())?;

        match packet {
            Packet::Publish(publish) => self.handle_publish(publish).await?,
            Packet::PubAck(puback) => self.handle_puback(puback.packet_id)?,
            Packet::PubRec(pubrec) => self.handle_pubrec(pubrec.packet_id).await?,
            Packet::PubRel(pubrel) => self.handle_pubrel(pubrel.packet_id).await?,
            Packet::PubComp(pubcomp) => self.handle_pubcomp(pubcomp.packet_id)?,
            Packet::Subscribe(subscribe) => self.handle_subscribe(subscribe).await?,
            Packet::Unsubscribe(unsubscribe) => self.handle_unsubscribe(unsubscribe).await?,
            Packet::PingReq => self.handle_pingreq().await?,
            Packet::Disconnect => return Ok(Some(self.handle_disconnect())),
            other => {
                return Err(MqttError::ProtocolError(format!(
                    "Unexpected {:?} from client",
                    other.packet_type()
                )))
            }
        }
        Ok(None)
    }
}

async fn keep_alive_expiry(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}
