mod common;

use bytes::Bytes;
use common::{test_broker, test_broker_with, unique_client_id, wait_until_offline, RawMqttClient};
use mqtt3::broker::{AuthProvider, AuthResult, BrokerConfig, Credentials};
use mqtt3::packet::{ConnectPacket, PublishPacket, SubAckReturnCode, SubscribePacket, UnsubscribePacket};
use mqtt3::{ConnectReturnCode, Packet, QoS, WillMessage};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

struct PasswordAuth;

impl AuthProvider for PasswordAuth {
    fn authorize<'a>(
        &'a self,
        _client_id: &'a str,
        credentials: &'a Credentials,
    ) -> Pin<Box<dyn Future<Output = mqtt3::Result<AuthResult>> + Send + 'a>> {
        Box::pin(async move {
            match (credentials.username.as_deref(), credentials.password.as_deref()) {
                (Some("device"), Some(b"secret")) => Ok(AuthResult::Accept),
                (None, _) => Ok(AuthResult::Reject(ConnectReturnCode::NotAuthorized)),
                _ => Ok(AuthResult::Reject(ConnectReturnCode::BadUsernameOrPassword)),
            }
        })
    }
}

#[tokio::test]
async fn first_packet_must_be_connect() {
    let broker = test_broker();
    let mut client = RawMqttClient::attach(&broker);
    client.send(Packet::PingReq).await;
    client.expect_closed_silently().await;
}

#[tokio::test]
async fn unsupported_protocol_level_closes_without_reply() {
    let broker = test_broker();
    let mut client = RawMqttClient::attach(&broker);
    client
        .send_raw(&[
            0x10, 13, 0x00, 0x04, b'M', b'Q', b'T', b'T', 0x05, 0x02, 0x00, 0x3C, 0x00, 0x01,
            b'a',
        ])
        .await;
    client.expect_closed_silently().await;
}

#[tokio::test]
async fn legacy_protocol_name_is_accepted() {
    let broker = test_broker();
    let (_client, connack) = RawMqttClient::connect(
        &broker,
        ConnectPacket::new(unique_client_id("legacy"))
            .with_protocol_version(mqtt3::ProtocolVersion::V31),
    )
    .await;
    assert_eq!(connack.return_code, ConnectReturnCode::Accepted);
}

#[tokio::test]
async fn second_connect_is_a_protocol_violation() {
    let broker = test_broker();
    let mut client = RawMqttClient::connected(&broker, &unique_client_id("twice")).await;
    client
        .send(Packet::Connect(Box::new(ConnectPacket::new("twice-again"))))
        .await;
    client.expect_closed().await;
}

#[tokio::test]
async fn empty_client_id_is_assigned_for_clean_sessions() {
    let broker = test_broker();
    let (mut client, connack) = RawMqttClient::connect(&broker, ConnectPacket::new("")).await;
    assert_eq!(connack.return_code, ConnectReturnCode::Accepted);
    assert!(!connack.session_present);
    client.sync().await;
    assert_eq!(broker.stats().clients_connected(), 1);
}

#[tokio::test]
async fn empty_client_id_without_clean_start_is_rejected() {
    let broker = test_broker();
    let (mut client, connack) =
        RawMqttClient::connect(&broker, ConnectPacket::new("").with_clean_start(false)).await;
    assert_eq!(connack.return_code, ConnectReturnCode::IdentifierRejected);
    assert!(!connack.session_present);
    client.expect_closed().await;
}

#[tokio::test]
async fn authorization_rejections_carry_return_code() {
    let broker = test_broker().with_auth_provider(Arc::new(PasswordAuth));

    let (mut anonymous, connack) =
        RawMqttClient::connect(&broker, ConnectPacket::new(unique_client_id("anon"))).await;
    assert_eq!(connack.return_code, ConnectReturnCode::NotAuthorized);
    anonymous.expect_closed().await;

    let (mut wrong, connack) = RawMqttClient::connect(
        &broker,
        ConnectPacket::new(unique_client_id("wrong")).with_credentials("device", b"guess".to_vec()),
    )
    .await;
    assert_eq!(connack.return_code, ConnectReturnCode::BadUsernameOrPassword);
    wrong.expect_closed().await;

    let (_ok, connack) = RawMqttClient::connect(
        &broker,
        ConnectPacket::new(unique_client_id("ok")).with_credentials("device", b"secret".to_vec()),
    )
    .await;
    assert_eq!(connack.return_code, ConnectReturnCode::Accepted);
}

#[tokio::test]
async fn invalid_filter_is_refused_alongside_granted_ones() {
    let broker = test_broker();
    let mut client = RawMqttClient::connected(&broker, &unique_client_id("c")).await;
    client
        .send(Packet::Subscribe(
            SubscribePacket::new(9)
                .add_filter("valid/+", QoS::AtLeastOnce)
                .add_filter("bad/#/filter", QoS::AtMostOnce)
                .add_filter("also/valid", QoS::ExactlyOnce),
        ))
        .await;

    let suback = client.expect_suback().await;
    assert_eq!(suback.packet_id, 9);
    assert_eq!(
        suback.return_codes,
        vec![
            SubAckReturnCode::Granted(QoS::AtLeastOnce),
            SubAckReturnCode::Failure,
            SubAckReturnCode::Granted(QoS::ExactlyOnce),
        ]
    );
    assert_eq!(suback.return_codes[1].to_u8(), 0x80);
}

#[tokio::test]
async fn unsubscribe_stops_delivery() {
    let broker = test_broker();
    let mut sub = RawMqttClient::connected(&broker, &unique_client_id("sub")).await;
    sub.subscribe(1, "news/#", QoS::AtMostOnce).await;
    sub.send(Packet::Unsubscribe(UnsubscribePacket::new(2).add_filter("news/#")))
        .await;
    match sub.recv().await {
        Packet::UnsubAck(unsuback) => assert_eq!(unsuback.packet_id, 2),
        other => panic!("expected UNSUBACK, got {other:?}"),
    }

    let mut publisher = RawMqttClient::connected(&broker, &unique_client_id("pub")).await;
    publisher
        .publish(
            PublishPacket::new("news/today", Bytes::from_static(b"x"), QoS::AtLeastOnce)
                .with_packet_id(1),
        )
        .await;
    sub.expect_nothing(Duration::from_millis(200)).await;
}

#[tokio::test]
async fn empty_retained_payload_clears_topic() {
    let broker = test_broker();
    let mut publisher = RawMqttClient::connected(&broker, &unique_client_id("pub")).await;
    publisher
        .publish(
            PublishPacket::new("lamp/state", Bytes::from_static(b"on"), QoS::AtLeastOnce)
                .with_packet_id(1)
                .with_retain(true),
        )
        .await;
    assert!(broker.router().has_retained_message("lamp/state").await);

    publisher
        .publish(
            PublishPacket::new("lamp/state", Bytes::new(), QoS::AtLeastOnce)
                .with_packet_id(2)
                .with_retain(true),
        )
        .await;
    assert!(!broker.router().has_retained_message("lamp/state").await);

    let mut sub = RawMqttClient::connected(&broker, &unique_client_id("sub")).await;
    sub.subscribe(1, "lamp/#", QoS::AtMostOnce).await;
    sub.expect_nothing(Duration::from_millis(200)).await;
}

#[tokio::test]
async fn system_topics_are_hidden_from_root_wildcards() {
    let broker = test_broker();
    let mut sub = RawMqttClient::connected(&broker, &unique_client_id("sub")).await;
    sub.subscribe(1, "#", QoS::AtMostOnce).await;

    let mut publisher = RawMqttClient::connected(&broker, &unique_client_id("pub")).await;
    publisher
        .publish(PublishPacket::new(
            "$SYS/uptime",
            Bytes::from_static(b"1"),
            QoS::AtMostOnce,
        ))
        .await;
    publisher.sync().await;
    sub.expect_nothing(Duration::from_millis(200)).await;
}

#[tokio::test]
async fn graceful_disconnect_discards_will() {
    let broker = test_broker();
    let mut watcher = RawMqttClient::connected(&broker, &unique_client_id("watcher")).await;
    watcher.subscribe(1, "wills/#", QoS::AtMostOnce).await;

    let id = unique_client_id("polite");
    let (client, _) = RawMqttClient::connect(
        &broker,
        ConnectPacket::new(id.as_str()).with_will(WillMessage::new("wills/polite", b"gone".to_vec())),
    )
    .await;
    client.disconnect().await;
    wait_until_offline(&broker, &id).await;

    watcher.expect_nothing(Duration::from_millis(200)).await;
}

#[tokio::test]
async fn dropped_transport_publishes_will() {
    let broker = test_broker();
    let mut watcher = RawMqttClient::connected(&broker, &unique_client_id("watcher")).await;
    watcher.subscribe(1, "wills/#", QoS::AtLeastOnce).await;

    let (client, _) = RawMqttClient::connect(
        &broker,
        ConnectPacket::new(unique_client_id("abrupt")).with_will(
            WillMessage::new("wills/abrupt", b"lost".to_vec())
                .with_qos(QoS::AtLeastOnce)
                .with_retain(true),
        ),
    )
    .await;
    drop(client);

    let will = watcher.expect_publish().await;
    assert_eq!(will.topic_name, "wills/abrupt");
    assert_eq!(will.qos, QoS::AtLeastOnce);
    assert!(!will.retain);
    assert!(broker.router().has_retained_message("wills/abrupt").await);
}

#[tokio::test(start_paused = true)]
async fn pings_keep_connection_alive() {
    let broker = test_broker();
    let (mut client, _) = RawMqttClient::connect(
        &broker,
        ConnectPacket::new(unique_client_id("pinger")).with_keep_alive(2),
    )
    .await;

    for _ in 0..5 {
        tokio::time::sleep(Duration::from_secs(2)).await;
        client.sync().await;
    }
    assert_eq!(broker.stats().clients_connected(), 1);
}

#[tokio::test(start_paused = true)]
async fn silent_connection_times_out_before_connect() {
    let broker = test_broker_with(
        BrokerConfig::default().with_connect_timeout(Duration::from_secs(2)),
    );
    let mut client = RawMqttClient::attach(&broker);
    client.expect_closed_silently().await;
}

#[tokio::test]
async fn shutdown_closes_live_connections() {
    let broker = test_broker();
    let mut client = RawMqttClient::connected(&broker, &unique_client_id("c")).await;
    client.sync().await;
    broker.shutdown();
    client.expect_closed().await;
}

/// Sends enough QoS 0 traffic on `flood` to fill a subscriber's pipe when it
/// never reads.
async fn flood(broker: &mqtt3::broker::MqttBroker) {
    let mut publisher = RawMqttClient::connected(broker, &unique_client_id("flooder")).await;
    let payload = Bytes::from(vec![0u8; 8 * 1024]);
    for _ in 0..100 {
        publisher
            .publish(PublishPacket::new("flood", payload.clone(), QoS::AtMostOnce))
            .await;
    }
    publisher.sync().await;
}

async fn stalled_subscriber(
    broker: &mqtt3::broker::MqttBroker,
    client_id: &str,
    keep_alive: u16,
) -> RawMqttClient {
    let (mut client, _) = RawMqttClient::connect(
        broker,
        ConnectPacket::new(client_id)
            .with_keep_alive(keep_alive)
            .with_will(WillMessage::new("wills/stalled", b"stuck".to_vec())),
    )
    .await;
    client.subscribe(1, "flood", QoS::AtMostOnce).await;
    client
}

#[tokio::test(start_paused = true)]
async fn keep_alive_closes_client_that_stops_reading() {
    let broker = test_broker();
    let mut watcher = RawMqttClient::connected(&broker, &unique_client_id("watcher")).await;
    watcher.subscribe(1, "wills/#", QoS::AtMostOnce).await;

    let id = unique_client_id("stalled");
    let _stalled = stalled_subscriber(&broker, &id, 1).await;
    flood(&broker).await;

    let will = watcher.expect_publish().await;
    assert_eq!(will.topic_name, "wills/stalled");
    wait_until_offline(&broker, &id).await;
}

#[tokio::test]
async fn shutdown_closes_client_that_stops_reading() {
    let broker = test_broker();
    let id = unique_client_id("stalled");
    let _stalled = stalled_subscriber(&broker, &id, 0).await;
    flood(&broker).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    broker.shutdown();
    wait_until_offline(&broker, &id).await;
}

#[tokio::test]
async fn takeover_closes_client_that_stops_reading() {
    let broker = test_broker();
    let mut watcher = RawMqttClient::connected(&broker, &unique_client_id("watcher")).await;
    watcher.subscribe(1, "wills/#", QoS::AtMostOnce).await;

    let id = unique_client_id("stalled");
    let _stalled = stalled_subscriber(&broker, &id, 0).await;
    flood(&broker).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut replacement = RawMqttClient::connected(&broker, &id).await;
    let will = watcher.expect_publish().await;
    assert_eq!(will.topic_name, "wills/stalled");
    replacement.sync().await;
}
