//! Client lifecycle management - disconnect, close and will message handling

use crate::broker::session::{SessionRelease, StoredMessage};
use crate::connection::CloseReason;
use crate::error::Result;
use crate::packet::{Packet, PublishPacket};
use crate::QoS;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info, warn};

use super::ClientHandler;

impl<S> ClientHandler<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// DISCONNECT discards the will.
    pub(super) fn handle_disconnect(&mut self) -> CloseReason {
        self.machine.on_disconnect();
        self.will = None;
        CloseReason::ClientDisconnect
    }

    pub(super) async fn handle_pingreq(&mut self) -> Result<()> {
        self.write_packet(&Packet::PingResp).await
    }

    /// Moves the connection to `Closed`: publishes the will when the close
    /// was ungraceful, leaves the router's live set and detaches the session.
    pub(super) async fn close(&mut self, reason: CloseReason) {
        let event = self.machine.close(reason);
        self.stream.shutdown().await;

        let Some(client_id) = self.client_id.clone() else {
            return;
        };

        self.router
            .disconnect_client(&client_id, self.connection_id)
            .await;

        if let Some(event) = event {
            debug!(
                client_id = %client_id,
                reason = ?event.reason,
                publish_will = event.publish_will,
                "Connection closed"
            );
            if event.publish_will {
                self.publish_will_message(&client_id).await;
            }
        }
        self.will = None;

        self.release_session(&client_id).await;
        self.stats.client_disconnected();
        info!(client_id = %client_id, "Client disconnected");
    }

    async fn publish_will_message(&mut self, client_id: &str) {
        let Some(will) = self.will.take() else {
            return;
        };
        debug!(client_id = %client_id, topic = %will.topic, "Publishing will message");
        let publish = PublishPacket::new(will.topic, will.payload, will.qos).with_retain(will.retain);
        self.router.route_message(&publish).await;
    }

    async fn release_session(&mut self, client_id: &str) {
        let Some(session) = self.session.take() else {
            return;
        };

        let unsent: Vec<StoredMessage> = self
            .publish_rx
            .drain()
            .filter(|publish| publish.qos != QoS::AtMostOnce)
            .map(|publish| StoredMessage::from_publish(&publish))
            .collect();
        if !unsent.is_empty() {
            let mut session = session.lock();
            if !session.clean_start {
                session.requeue_front(unsent, self.config.max_queued_messages);
            }
        }

        match self.sessions.release(client_id, self.connection_id) {
            SessionRelease::Discarded => {
                self.router
                    .remove_session_subscriptions(client_id, self.generation)
                    .await;
            }
            SessionRelease::Retained(snapshot) => {
                if let Some(ref storage) = self.storage {
                    if let Err(e) = storage.save_session(&snapshot).await {
                        warn!(client_id = %client_id, "Failed to store session: {e}");
                    }
                }
            }
            SessionRelease::NotOwner => {
                if self.sessions.generation(client_id) == Some(self.generation) {
                    debug!(client_id = %client_id, "Session already attached to another connection");
                } else {
                    debug!(client_id = %client_id, "Session replaced by another connection");
                    self.router
                        .remove_session_subscriptions(client_id, self.generation)
                        .await;
                }
            }
        }
    }
}
