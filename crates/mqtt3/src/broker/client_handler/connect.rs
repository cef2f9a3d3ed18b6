//! CONNECT handling: identity, authorization and session attachment

use crate::broker::auth::{AuthResult, Credentials};
use crate::error::{MqttError, Result};
use crate::packet::{ConnAckPacket, ConnectPacket, Packet};
use crate::types::ConnectReturnCode;
use crate::validation::validate_client_id;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::ClientHandler;

impl<S> ClientHandler<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Reads the first packet. Anything other than a well formed CONNECT
    /// closes the connection without a reply.
    pub(super) async fn wait_for_connect(&mut self) -> Result<()> {
        let packet = self.stream.read_packet().await?;
        self.machine.check_inbound(packet.packet_type())?;

        match packet {
            Packet::Connect(connect) => self.handle_connect(*connect).await,
            other => Err(MqttError::ProtocolError(format!(
                "Expected CONNECT, received {:?}",
                other.packet_type()
            ))),
        }
    }

    async fn handle_connect(&mut self, connect: ConnectPacket) -> Result<()> {
        debug!(
            client_id = %connect.client_id,
            version = ?connect.protocol_version,
            clean_start = connect.clean_start,
            keep_alive = connect.keep_alive,
            "CONNECT received"
        );

        let Some(client_id) = self.resolve_client_id(&connect) else {
            return self.refuse(ConnectReturnCode::IdentifierRejected).await;
        };

        let credentials = Credentials::new(connect.username.clone(), connect.password.clone());
        match self.auth_provider.authorize(&client_id, &credentials).await {
            Ok(AuthResult::Accept) => {}
            Ok(AuthResult::Reject(code)) => {
                info!(client_id = %client_id, ?code, "Connection refused by authorization");
                return self.refuse(code).await;
            }
            Err(e) => {
                warn!(client_id = %client_id, "Authorization failed: {e}");
                return self.refuse(ConnectReturnCode::ServerUnavailable).await;
            }
        }

        let disconnect_tx = self
            .disconnect_tx
            .take()
            .ok_or_else(|| MqttError::Internal("connection already registered".to_string()))?;

        let stored = self.load_stored_session(&client_id, connect.clean_start).await;
        let opened = self
            .sessions
            .open(&client_id, connect.clean_start, self.connection_id, stored);
        let session_present = opened.session_present;
        if let Some(replaced) = opened.replaced {
            self.router
                .remove_session_subscriptions(&client_id, replaced)
                .await;
        }

        self.router
            .register_client(
                client_id.clone(),
                self.connection_id,
                self.publish_tx.clone(),
                disconnect_tx,
            )
            .await;
        self.stats.client_connected();
        self.client_id = Some(client_id.clone());
        self.session = Some(opened.handle);
        self.generation = opened.generation;
        self.will = connect.will;

        self.write_packet(&Packet::ConnAck(ConnAckPacket::accepted(session_present)))
            .await?;
        self.machine.on_connect_accepted(connect.keep_alive)?;
        self.last_packet_time = Instant::now();

        info!(
            client_id = %client_id,
            addr = ?self.client_addr,
            session_present,
            keep_alive = connect.keep_alive,
            "Client connected"
        );

        self.resume_session().await
    }

    /// Client identifier to use, or `None` when it must be rejected. An
    /// empty identifier is replaced with a generated one for clean sessions.
    fn resolve_client_id(&self, connect: &ConnectPacket) -> Option<String> {
        if connect.client_id.is_empty() {
            if connect.clean_start && self.config.allow_anonymous_client_id {
                let nanos = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map_or(0, |d| d.as_nanos());
                let generated = format!("auto-{nanos:x}-{:x}", self.connection_id);
                debug!(client_id = %generated, "Assigned client identifier");
                return Some(generated);
            }
            return None;
        }
        match validate_client_id(&connect.client_id) {
            Ok(()) => Some(connect.client_id.clone()),
            Err(e) => {
                debug!("Rejecting client identifier: {e}");
                None
            }
        }
    }

    /// Clears stored state for clean start, or fetches a stored session
    /// that is not in memory.
    async fn load_stored_session(
        &mut self,
        client_id: &str,
        clean_start: bool,
    ) -> Option<crate::broker::session::Session> {
        let storage = self.storage.clone()?;
        if clean_start {
            if let Err(e) = storage.remove_session(client_id).await {
                warn!(client_id = %client_id, "Failed to remove stored session: {e}");
            }
            return None;
        }
        if self.sessions.contains(client_id) {
            return None;
        }
        match storage.load_session(client_id).await {
            Ok(session) => session,
            Err(e) => {
                warn!(client_id = %client_id, "Failed to load stored session: {e}");
                None
            }
        }
    }

    /// Restores subscriptions in the router, resends unacknowledged messages
    /// and then delivers what was queued while the client was away.
    async fn resume_session(&mut self) -> Result<()> {
        let (subscriptions, retransmissions) = {
            let session = self.session()?.lock();
            let subscriptions: Vec<_> = session
                .subscriptions
                .iter()
                .map(|(filter, qos)| (filter.clone(), *qos))
                .collect();
            (subscriptions, session.retransmissions())
        };

        let client_id = self.client_id().to_string();
        for (filter, qos) in subscriptions {
            if let Err(e) = self
                .router
                .subscribe(&client_id, self.generation, &filter, qos)
                .await
            {
                warn!(client_id = %client_id, filter = %filter, "Failed to restore subscription: {e}");
            }
        }

        if !retransmissions.is_empty() {
            debug!(client_id = %client_id, count = retransmissions.len(), "Retransmitting in-flight messages");
        }
        for packet in retransmissions {
            self.write_packet(&packet).await?;
        }

        self.flush_outbound().await
    }

    async fn refuse(&mut self, code: ConnectReturnCode) -> Result<()> {
        let code = if code.is_success() {
            ConnectReturnCode::NotAuthorized
        } else {
            code
        };
        self.write_packet(&Packet::ConnAck(ConnAckPacket::refused(code)))
            .await?;
        Err(MqttError::ConnectionRefused(code))
    }
}
