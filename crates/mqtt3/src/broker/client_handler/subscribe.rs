use crate::error::Result;
use crate::packet::{
    Packet, SubAckPacket, SubAckReturnCode, SubscribePacket, UnsubAckPacket, UnsubscribePacket,
};
use crate::QoS;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, warn};

use super::ClientHandler;

impl<S> ClientHandler<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub(super) async fn handle_subscribe(&mut self, subscribe: SubscribePacket) -> Result<()> {
        let client_id = self.client_id().to_string();
        let mut return_codes = Vec::with_capacity(subscribe.filters.len());
        let mut granted: Vec<(String, QoS)> = Vec::new();

        for filter in subscribe.filters {
            match self
                .router
                .subscribe(&client_id, self.generation, &filter.filter, filter.qos)
                .await
            {
                Ok(_) => {
                    self.session()?
                        .lock()
                        .add_subscription(filter.filter.clone(), filter.qos);
                    return_codes.push(SubAckReturnCode::Granted(filter.qos));
                    granted.push((filter.filter, filter.qos));
                }
                Err(e) => {
                    warn!(client_id = %client_id, filter = %filter.filter, "Subscription rejected: {e}");
                    return_codes.push(SubAckReturnCode::Failure);
                }
            }
        }

        self.write_packet(&Packet::SubAck(SubAckPacket::new(
            subscribe.packet_id,
            return_codes,
        )))
        .await?;

        for (filter, qos) in granted {
            self.deliver_retained_for_filter(&filter, qos).await?;
        }
        Ok(())
    }

    /// Sends the retained messages matching a new subscription, each at the
    /// lower of its stored QoS and the granted QoS.
    async fn deliver_retained_for_filter(&mut self, filter: &str, granted: QoS) -> Result<()> {
        let retained = self.router.retained_messages(filter).await;
        if !retained.is_empty() {
            debug!(client_id = %self.client_id(), filter = %filter, count = retained.len(), "Delivering retained messages");
        }
        for mut publish in retained {
            publish.qos = publish.qos.min(granted);
            self.send_publish(publish).await?;
        }
        Ok(())
    }

    pub(super) async fn handle_unsubscribe(&mut self, unsubscribe: UnsubscribePacket) -> Result<()> {
        let client_id = self.client_id().to_string();
        for filter in &unsubscribe.filters {
            self.router.unsubscribe(&client_id, self.generation, filter).await;
            self.session()?.lock().remove_subscription(filter);
        }
        self.write_packet(&Packet::UnsubAck(UnsubAckPacket::new(unsubscribe.packet_id)))
            .await
    }
}
