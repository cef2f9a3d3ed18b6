//! PUBLISH flows in both directions and the QoS acknowledgments

use crate::broker::session::StoredMessage;
use crate::error::Result;
use crate::handshake::{
    handle_incoming_puback, handle_incoming_pubcomp, handle_incoming_publish,
    handle_incoming_pubrec, handle_incoming_pubrel, handle_outgoing_publish, HandshakeAction,
};
use crate::packet::{Packet, PublishPacket};
use crate::QoS;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, trace};

use super::ClientHandler;

impl<S> ClientHandler<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub(super) async fn handle_publish(&mut self, publish: PublishPacket) -> Result<()> {
        trace!(
            client_id = %self.client_id(),
            topic = %publish.topic_name,
            qos = ?publish.qos,
            packet_id = ?publish.packet_id,
            "PUBLISH received"
        );
        self.stats.publish_received();

        let awaiting_pubrel = match publish.packet_id {
            Some(packet_id) if publish.qos != QoS::AtMostOnce => {
                self.session()?.lock().is_awaiting_pubrel(packet_id)
            }
            _ => false,
        };
        let actions = handle_incoming_publish(publish.qos, publish.packet_id, awaiting_pubrel)?;

        // QoS 2 slot is reserved before routing
        for action in &actions {
            if let HandshakeAction::TrackIncoming { packet_id } = *action {
                self.session()?
                    .lock()
                    .track_inbound(packet_id, self.config.max_inflight_qos2)?;
            }
        }

        for action in actions {
            match action {
                HandshakeAction::Deliver => {
                    self.router.route_message(&publish).await;
                }
                HandshakeAction::TrackIncoming { .. } => {}
                other => self.apply_handshake_action(other).await?,
            }
        }
        Ok(())
    }

    pub(super) fn handle_puback(&mut self, packet_id: u16) -> Result<()> {
        let state = self.session()?.lock().outbound_state(packet_id);
        let actions = handle_incoming_puback(packet_id, state);
        if actions.is_empty() {
            debug!(client_id = %self.client_id(), packet_id, "PUBACK for unknown packet identifier");
        }
        for action in actions {
            self.apply_session_action(action)?;
        }
        Ok(())
    }

    pub(super) async fn handle_pubrec(&mut self, packet_id: u16) -> Result<()> {
        let state = self.session()?.lock().outbound_state(packet_id);
        let actions = handle_incoming_pubrec(packet_id, state);
        if actions.is_empty() {
            debug!(client_id = %self.client_id(), packet_id, "PUBREC for unknown packet identifier");
        }
        for action in actions {
            self.apply_handshake_action(action).await?;
        }
        Ok(())
    }

    pub(super) async fn handle_pubrel(&mut self, packet_id: u16) -> Result<()> {
        let awaiting = self.session()?.lock().is_awaiting_pubrel(packet_id);
        for action in handle_incoming_pubrel(packet_id, awaiting) {
            self.apply_handshake_action(action).await?;
        }
        Ok(())
    }

    pub(super) fn handle_pubcomp(&mut self, packet_id: u16) -> Result<()> {
        let state = self.session()?.lock().outbound_state(packet_id);
        let actions = handle_incoming_pubcomp(packet_id, state);
        if actions.is_empty() {
            debug!(client_id = %self.client_id(), packet_id, "PUBCOMP for unknown packet identifier");
        }
        for action in actions {
            self.apply_session_action(action)?;
        }
        Ok(())
    }

    async fn apply_handshake_action(&mut self, action: HandshakeAction) -> Result<()> {
        if let Some(packet) = action.to_packet() {
            return self.write_packet(&packet).await;
        }
        self.apply_session_action(action)
    }

    fn apply_session_action(&mut self, action: HandshakeAction) -> Result<()> {
        let mut session = self.session()?.lock();
        match action {
            HandshakeAction::TrackOutgoing { packet_id, state } => {
                session.set_outbound_state(packet_id, state);
            }
            HandshakeAction::CompleteOutgoing { packet_id } => {
                session.complete_outbound(packet_id);
            }
            HandshakeAction::TrackIncoming { packet_id } => {
                session.track_inbound(packet_id, self.config.max_inflight_qos2)?;
            }
            HandshakeAction::ReleaseIncoming { packet_id } => {
                session.release_inbound(packet_id);
            }
            _ => {}
        }
        Ok(())
    }

    pub(super) fn has_outbound_capacity(&self) -> Result<bool> {
        Ok(self.session()?.lock().outbound_len() < self.config.max_inflight_messages)
    }

    /// Writes a delivery to the client, assigning a packet identifier and
    /// recording the in-flight state for QoS 1 and 2.
    pub(super) async fn send_publish(&mut self, mut publish: PublishPacket) -> Result<()> {
        if publish.qos != QoS::AtMostOnce {
            let mut session = self.session()?.lock();
            let packet_id = session.allocate_packet_id()?;
            for action in handle_outgoing_publish(publish.qos, packet_id) {
                if let HandshakeAction::TrackOutgoing { packet_id, state } = action {
                    session.track_outbound(packet_id, StoredMessage::from_publish(&publish), state);
                }
            }
            publish.packet_id = Some(packet_id);
        }

        trace!(
            client_id = %self.client_id(),
            topic = %publish.topic_name,
            qos = ?publish.qos,
            packet_id = ?publish.packet_id,
            "Sending PUBLISH"
        );
        self.write_packet(&Packet::Publish(publish)).await?;
        self.stats.publish_sent();
        Ok(())
    }

    /// Moves deliveries to the wire while the in-flight window has room:
    /// first the connection's channel, then the session queue once the
    /// channel is empty.
    pub(super) async fn flush_outbound(&mut self) -> Result<()> {
        while let Some(publish) = self.next_outbound()? {
            self.send_publish(publish).await?;
        }
        Ok(())
    }

    fn next_outbound(&self) -> Result<Option<PublishPacket>> {
        let mut session = self.session()?.lock();
        if session.outbound_len() >= self.config.max_inflight_messages {
            return Ok(None);
        }
        if let Ok(publish) = self.publish_rx.try_recv() {
            return Ok(Some(publish));
        }
        Ok(session
            .take_pending(1)
            .pop()
            .map(|message| message.to_publish()))
    }
}
