//! Incremental framing on top of [`FixedHeader`] and [`Packet`].
//!
//! The decoder works on whatever bytes the transport has delivered so far. It
//! never blocks and never consumes a partial packet: `Ok(None)` leaves the
//! buffer untouched so the caller can append the next read and try again.

use crate::encoding::MAX_VARIABLE_INT;
use crate::error::{MqttError, Result};
use crate::packet::{FixedHeader, Packet};
use bytes::{Buf, BytesMut};
use tracing::trace;

#[derive(Debug, Clone, Copy)]
pub struct PacketDecoder {
    max_packet_size: usize,
}

impl Default for PacketDecoder {
    fn default() -> Self {
        Self::new(MAX_VARIABLE_INT as usize)
    }
}

impl PacketDecoder {
    /// `max_packet_size` bounds the remaining length of any inbound packet.
    #[must_use]
    pub fn new(max_packet_size: usize) -> Self {
        Self { max_packet_size }
    }

    #[must_use]
    pub fn max_packet_size(&self) -> usize {
        self.max_packet_size
    }

    /// Attempts to take one complete packet off the front of `buf`.
    ///
    /// Oversized packets are refused as soon as their fixed header is readable,
    /// before any of the body is buffered.
    pub fn decode(&self, buf: &mut BytesMut) -> Result<Option<Packet>> {
        let Some((fixed_header, header_len)) = FixedHeader::parse(buf)? else {
            return Ok(None);
        };

        let body_len = fixed_header.remaining_length as usize;
        if body_len > self.max_packet_size {
            return Err(MqttError::PacketTooLarge {
                size: body_len,
                max: self.max_packet_size,
            });
        }

        let total = header_len + body_len;
        if buf.len() < total {
            buf.reserve(total - buf.len());
            return Ok(None);
        }

        buf.advance(header_len);
        let mut body = buf.split_to(body_len).freeze();
        trace!(
            packet_type = ?fixed_header.packet_type,
            remaining_length = body_len,
            "Decoding packet"
        );
        Packet::decode_from_body(&fixed_header, &mut body).map(Some)
    }
}

pub fn encode_packet(packet: &Packet, buf: &mut BytesMut) -> Result<()> {
    packet.encode(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{
        ConnAckPacket, ConnectPacket, PubAckPacket, PubCompPacket, PubRecPacket, PubRelPacket,
        PublishPacket, SubAckPacket, SubAckReturnCode, SubscribePacket, UnsubAckPacket,
        UnsubscribePacket,
    };
    use crate::types::{ConnectReturnCode, QoS, WillMessage};
    use bytes::Bytes;
    use proptest::prelude::*;

    fn encode(packet: &Packet) -> BytesMut {
        let mut buf = BytesMut::new();
        encode_packet(packet, &mut buf).unwrap();
        buf
    }

    fn sample_packets() -> Vec<Packet> {
        vec![
            ConnectPacket::new("client-1")
                .with_will(WillMessage::new("last/will", b"bye".to_vec()).with_qos(QoS::ExactlyOnce))
                .with_credentials("u", b"p".to_vec())
                .into(),
            Packet::ConnAck(ConnAckPacket::accepted(true)),
            Packet::ConnAck(ConnAckPacket::refused(ConnectReturnCode::BadUsernameOrPassword)),
            PublishPacket::new("a/b", Bytes::from_static(b"payload"), QoS::AtLeastOnce)
                .with_packet_id(1)
                .into(),
            Packet::PubAck(PubAckPacket::new(1)),
            Packet::PubRec(PubRecPacket::new(2)),
            Packet::PubRel(PubRelPacket::new(3)),
            Packet::PubComp(PubCompPacket::new(4)),
            Packet::Subscribe(SubscribePacket::new(5).add_filter("a/#", QoS::ExactlyOnce)),
            Packet::SubAck(SubAckPacket::new(5, vec![SubAckReturnCode::Granted(QoS::ExactlyOnce)])),
            Packet::Unsubscribe(UnsubscribePacket::new(6).add_filter("a/#")),
            Packet::UnsubAck(UnsubAckPacket::new(6)),
            Packet::PingReq,
            Packet::PingResp,
            Packet::Disconnect,
        ]
    }

    #[test]
    fn test_every_variant_roundtrips() {
        for packet in sample_packets() {
            let mut buf = encode(&packet);
            let decoder = PacketDecoder::default();
            assert_eq!(decoder.decode(&mut buf).unwrap(), Some(packet));
            assert!(buf.is_empty());
        }
    }

    #[test]
    fn test_need_more_bytes_leaves_buffer_intact() {
        let full = encode(&PublishPacket::new("t", Bytes::from_static(b"xyz"), QoS::AtMostOnce).into());
        let decoder = PacketDecoder::default();
        for cut in 0..full.len() {
            let mut partial = BytesMut::from(&full[..cut]);
            assert_eq!(decoder.decode(&mut partial).unwrap(), None);
            assert_eq!(&partial[..], &full[..cut]);
        }
    }

    #[test]
    fn test_multiple_packets_in_one_read() {
        let mut buf = encode(&Packet::PingReq);
        buf.extend_from_slice(&encode(&Packet::PubAck(PubAckPacket::new(9))));
        let decoder = PacketDecoder::default();
        assert_eq!(decoder.decode(&mut buf).unwrap(), Some(Packet::PingReq));
        assert_eq!(
            decoder.decode(&mut buf).unwrap(),
            Some(Packet::PubAck(PubAckPacket::new(9)))
        );
        assert_eq!(decoder.decode(&mut buf).unwrap(), None);
    }

    #[test]
    fn test_oversized_packet_rejected_before_body() {
        let decoder = PacketDecoder::new(16);
        let mut buf = BytesMut::from(&[0x30, 0x80, 0x01][..]);
        assert!(matches!(
            decoder.decode(&mut buf),
            Err(MqttError::PacketTooLarge { size: 128, max: 16 })
        ));
    }

    #[test]
    fn test_five_byte_remaining_length_rejected() {
        let decoder = PacketDecoder::default();
        let mut buf = BytesMut::from(&[0x30, 0xFF, 0xFF, 0xFF, 0xFF, 0x7F][..]);
        assert!(matches!(
            decoder.decode(&mut buf),
            Err(MqttError::MalformedPacket(_))
        ));
    }

    #[test]
    fn test_body_shorter_than_declared_fields() {
        let decoder = PacketDecoder::default();
        let mut buf = BytesMut::from(&[0x40, 0x01, 0x00][..]);
        assert!(decoder.decode(&mut buf).is_err());
    }

    fn arb_qos() -> impl Strategy<Value = QoS> {
        prop_oneof![
            Just(QoS::AtMostOnce),
            Just(QoS::AtLeastOnce),
            Just(QoS::ExactlyOnce)
        ]
    }

    fn arb_topic() -> impl Strategy<Value = String> {
        "[a-z0-9]{1,8}(/[a-z0-9]{1,8}){0,4}"
    }

    fn arb_publish() -> impl Strategy<Value = Packet> {
        (
            arb_topic(),
            proptest::collection::vec(any::<u8>(), 0..256),
            arb_qos(),
            any::<bool>(),
            any::<bool>(),
            1u16..,
        )
            .prop_map(|(topic, payload, qos, retain, dup, id)| {
                let mut packet = PublishPacket::new(topic, payload, qos).with_retain(retain);
                if qos != QoS::AtMostOnce {
                    packet = packet.with_packet_id(id).with_dup(dup);
                }
                Packet::Publish(packet)
            })
    }

    proptest! {
        #[test]
        fn prop_publish_roundtrip(packet in arb_publish()) {
            let mut buf = encode(&packet);
            prop_assert_eq!(PacketDecoder::default().decode(&mut buf).unwrap(), Some(packet));
        }

        #[test]
        fn prop_split_reads_decode_identically(packet in arb_publish(), split in 0usize..64) {
            let bytes = encode(&packet);
            let split = split.min(bytes.len());
            let decoder = PacketDecoder::default();

            let mut buf = BytesMut::from(&bytes[..split]);
            let early = decoder.decode(&mut buf).unwrap();
            if split < bytes.len() {
                prop_assert!(early.is_none());
                buf.extend_from_slice(&bytes[split..]);
                prop_assert_eq!(decoder.decode(&mut buf).unwrap(), Some(packet));
            } else {
                prop_assert_eq!(early, Some(packet));
            }
        }

        #[test]
        fn prop_garbage_never_panics(bytes in proptest::collection::vec(any::<u8>(), 0..128)) {
            let mut buf = BytesMut::from(&bytes[..]);
            let decoder = PacketDecoder::new(1024);
            while let Ok(Some(_)) = decoder.decode(&mut buf) {}
        }

        #[test]
        fn prop_subscribe_roundtrip(
            id in 1u16..,
            filters in proptest::collection::vec((arb_topic(), arb_qos()), 1..5),
        ) {
            let mut packet = SubscribePacket::new(id);
            for (filter, qos) in filters {
                packet = packet.add_filter(filter, qos);
            }
            let packet = Packet::Subscribe(packet);
            let mut buf = encode(&packet);
            prop_assert_eq!(PacketDecoder::default().decode(&mut buf).unwrap(), Some(packet));
        }
    }
}
