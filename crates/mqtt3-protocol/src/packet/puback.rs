use super::ack_common::define_ack_packet;
use crate::packet::PacketType;

define_ack_packet! {
    /// PUBACK: acknowledges a QoS 1 PUBLISH.
    pub struct PubAckPacket;
    packet_type = PacketType::PubAck;
    error_prefix = "PUBACK";
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{FixedHeader, MqttPacket};
    use bytes::BytesMut;

    #[test]
    fn test_puback_wire_format() {
        let mut buf = BytesMut::new();
        PubAckPacket::new(0x1234).encode(&mut buf).unwrap();
        assert_eq!(&buf[..], &[0x40, 0x02, 0x12, 0x34]);

        let fixed_header = FixedHeader::decode(&mut buf).unwrap();
        let decoded = PubAckPacket::decode_body(&mut buf, &fixed_header).unwrap();
        assert_eq!(decoded.packet_id, 0x1234);
    }

    #[test]
    fn test_puback_rejects_zero_id() {
        let mut buf = BytesMut::from(&[0x00, 0x00][..]);
        let fixed_header = FixedHeader::new(PacketType::PubAck, 0, 2);
        assert!(PubAckPacket::decode_body(&mut buf, &fixed_header).is_err());
    }

    #[test]
    fn test_puback_rejects_extra_bytes() {
        let mut buf = BytesMut::from(&[0x00, 0x01, 0x00][..]);
        let fixed_header = FixedHeader::new(PacketType::PubAck, 0, 3);
        assert!(PubAckPacket::decode_body(&mut buf, &fixed_header).is_err());
    }
}
