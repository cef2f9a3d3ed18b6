//! Raw in-memory client for driving the broker in integration tests.
//!
//! [`RawMqttClient`] speaks bytes over one end of a `tokio::io::duplex` pipe
//! whose other end is served by [`MqttBroker::serve_connection`]. Packets are
//! framed with the protocol crate, and [`RawMqttClient::send_raw`] allows
//! malformed input.

#![allow(dead_code)]

use bytes::BytesMut;
use mqtt3::broker::{BrokerConfig, MqttBroker};
use mqtt3::codec::{encode_packet, PacketDecoder};
use mqtt3::packet::{
    ConnAckPacket, ConnectPacket, PubAckPacket, PubCompPacket, PubRecPacket, PubRelPacket,
    PublishPacket, SubAckPacket, SubscribePacket,
};
use mqtt3::{Packet, QoS};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

pub const TIMEOUT: Duration = Duration::from_secs(3);

const PIPE_CAPACITY: usize = 64 * 1024;

static CLIENT_COUNTER: AtomicU32 = AtomicU32::new(0);

pub fn unique_client_id(prefix: &str) -> String {
    format!("{prefix}-{}", CLIENT_COUNTER.fetch_add(1, Ordering::Relaxed))
}

pub fn test_broker() -> MqttBroker {
    test_broker_with(BrokerConfig::default())
}

pub fn test_broker_with(config: BrokerConfig) -> MqttBroker {
    MqttBroker::new(config).expect("valid broker config")
}

/// Waits until the broker has finished closing `client_id`'s connection.
pub async fn wait_until_offline(broker: &MqttBroker, client_id: &str) {
    let router = broker.router();
    tokio::time::timeout(TIMEOUT, async {
        while router.is_connected(client_id).await
            || broker
                .sessions()
                .get(client_id)
                .is_some_and(|session| session.lock().is_connected())
        {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("client went offline");
}

pub struct RawMqttClient {
    stream: DuplexStream,
    decoder: PacketDecoder,
    buffer: BytesMut,
}

impl RawMqttClient {
    /// Opens a new in-memory connection served by `broker`.
    pub fn attach(broker: &MqttBroker) -> Self {
        let (client_side, server_side) = tokio::io::duplex(PIPE_CAPACITY);
        broker
            .serve_connection(server_side, None)
            .expect("broker accepted the connection");
        Self {
            stream: client_side,
            decoder: PacketDecoder::new(1024 * 1024),
            buffer: BytesMut::new(),
        }
    }

    /// Sends CONNECT and returns the CONNACK.
    pub async fn connect(broker: &MqttBroker, connect: ConnectPacket) -> (Self, ConnAckPacket) {
        let mut client = Self::attach(broker);
        client.send(Packet::Connect(Box::new(connect))).await;
        let connack = client.expect_connack().await;
        (client, connack)
    }

    /// Connects with a clean session and asserts acceptance.
    pub async fn connected(broker: &MqttBroker, client_id: &str) -> Self {
        let (client, connack) = Self::connect(broker, ConnectPacket::new(client_id)).await;
        assert_eq!(connack.return_code, mqtt3::ConnectReturnCode::Accepted);
        client
    }

    pub async fn send(&mut self, packet: Packet) {
        let mut buf = BytesMut::new();
        encode_packet(&packet, &mut buf).expect("encodable packet");
        self.send_raw(&buf).await;
    }

    pub async fn send_raw(&mut self, data: &[u8]) {
        self.stream.write_all(data).await.expect("write to broker");
    }

    /// Next packet from the broker, or `None` on timeout or close.
    pub async fn recv_within(&mut self, timeout_dur: Duration) -> Option<Packet> {
        tokio::time::timeout(timeout_dur, self.read_packet())
            .await
            .ok()
            .flatten()
    }

    pub async fn recv(&mut self) -> Packet {
        self.recv_within(TIMEOUT)
            .await
            .expect("broker sent a packet")
    }

    async fn read_packet(&mut self) -> Option<Packet> {
        loop {
            if let Some(packet) = self.decoder.decode(&mut self.buffer).expect("valid packet") {
                return Some(packet);
            }
            let n = self.stream.read_buf(&mut self.buffer).await.ok()?;
            if n == 0 {
                return None;
            }
        }
    }

    /// Asserts the broker closes the connection without sending anything.
    pub async fn expect_closed_silently(&mut self) {
        let mut buf = [0u8; 64];
        let n = tokio::time::timeout(TIMEOUT, self.stream.read(&mut buf))
            .await
            .expect("connection closed in time")
            .unwrap_or(0);
        assert_eq!(n, 0, "broker wrote {:?} before closing", &buf[..n]);
    }

    /// Asserts the broker closes the connection, skipping any packets sent
    /// before the close.
    pub async fn expect_closed(&mut self) {
        let closed = tokio::time::timeout(TIMEOUT, async {
            while self.read_packet().await.is_some() {}
        })
        .await;
        assert!(closed.is_ok(), "connection stayed open");
    }

    pub async fn expect_nothing(&mut self, wait: Duration) {
        if let Some(packet) = self.recv_within(wait).await {
            panic!("unexpected packet {packet:?}");
        }
    }

    pub async fn expect_connack(&mut self) -> ConnAckPacket {
        match self.recv().await {
            Packet::ConnAck(connack) => connack,
            other => panic!("expected CONNACK, got {other:?}"),
        }
    }

    pub async fn expect_suback(&mut self) -> SubAckPacket {
        match self.recv().await {
            Packet::SubAck(suback) => suback,
            other => panic!("expected SUBACK, got {other:?}"),
        }
    }

    pub async fn expect_publish(&mut self) -> PublishPacket {
        match self.recv().await {
            Packet::Publish(publish) => publish,
            other => panic!("expected PUBLISH, got {other:?}"),
        }
    }

    pub async fn expect_puback(&mut self) -> u16 {
        match self.recv().await {
            Packet::PubAck(puback) => puback.packet_id,
            other => panic!("expected PUBACK, got {other:?}"),
        }
    }

    pub async fn expect_pubrec(&mut self) -> u16 {
        match self.recv().await {
            Packet::PubRec(pubrec) => pubrec.packet_id,
            other => panic!("expected PUBREC, got {other:?}"),
        }
    }

    pub async fn expect_pubrel(&mut self) -> u16 {
        match self.recv().await {
            Packet::PubRel(pubrel) => pubrel.packet_id,
            other => panic!("expected PUBREL, got {other:?}"),
        }
    }

    pub async fn expect_pubcomp(&mut self) -> u16 {
        match self.recv().await {
            Packet::PubComp(pubcomp) => pubcomp.packet_id,
            other => panic!("expected PUBCOMP, got {other:?}"),
        }
    }

    pub async fn subscribe(&mut self, packet_id: u16, filter: &str, qos: QoS) -> SubAckPacket {
        self.send(Packet::Subscribe(
            SubscribePacket::new(packet_id).add_filter(filter, qos),
        ))
        .await;
        let suback = self.expect_suback().await;
        assert_eq!(suback.packet_id, packet_id);
        suback
    }

    /// Publishes and completes the sender side handshake.
    pub async fn publish(&mut self, publish: PublishPacket) {
        let qos = publish.qos;
        let packet_id = publish.packet_id;
        self.send(Packet::Publish(publish)).await;
        match (qos, packet_id) {
            (QoS::AtMostOnce, _) => {}
            (QoS::AtLeastOnce, Some(id)) => assert_eq!(self.expect_puback().await, id),
            (QoS::ExactlyOnce, Some(id)) => {
                assert_eq!(self.expect_pubrec().await, id);
                self.send(Packet::PubRel(PubRelPacket::new(id))).await;
                assert_eq!(self.expect_pubcomp().await, id);
            }
            (_, None) => panic!("QoS {qos:?} publish needs a packet identifier"),
        }
    }

    pub async fn puback(&mut self, packet_id: u16) {
        self.send(Packet::PubAck(PubAckPacket::new(packet_id))).await;
    }

    pub async fn pubrec(&mut self, packet_id: u16) {
        self.send(Packet::PubRec(PubRecPacket::new(packet_id))).await;
    }

    pub async fn pubcomp(&mut self, packet_id: u16) {
        self.send(Packet::PubComp(PubCompPacket::new(packet_id))).await;
    }

    /// Round trips a PINGREQ so every earlier packet has been processed.
    pub async fn sync(&mut self) {
        self.send(Packet::PingReq).await;
        match self.recv().await {
            Packet::PingResp => {}
            other => panic!("expected PINGRESP, got {other:?}"),
        }
    }

    pub async fn disconnect(mut self) {
        self.send(Packet::Disconnect).await;
        self.expect_closed().await;
    }
}
