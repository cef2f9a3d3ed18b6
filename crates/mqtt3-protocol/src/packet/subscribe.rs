use crate::encoding::{decode_string, encode_string};
use crate::error::{MqttError, Result};
use crate::packet::ack_common::decode_packet_id;
use crate::packet::{FixedHeader, MqttPacket, PacketType};
use crate::types::QoS;
use bytes::{Buf, BufMut};

/// One requested subscription inside a SUBSCRIBE.
///
/// The filter string is carried as received. Structural validation happens in
/// the broker so that one bad filter is refused in SUBACK without failing the
/// whole packet.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicFilter {
    pub filter: String,
    pub qos: QoS,
}

impl TopicFilter {
    #[must_use]
    pub fn new(filter: impl Into<String>, qos: QoS) -> Self {
        Self {
            filter: filter.into(),
            qos,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribePacket {
    pub packet_id: u16,
    pub filters: Vec<TopicFilter>,
}

impl SubscribePacket {
    #[must_use]
    pub fn new(packet_id: u16) -> Self {
        Self {
            packet_id,
            filters: Vec::new(),
        }
    }

    #[must_use]
    pub fn add_filter(mut self, filter: impl Into<String>, qos: QoS) -> Self {
        self.filters.push(TopicFilter::new(filter, qos));
        self
    }
}

impl MqttPacket for SubscribePacket {
    fn packet_type(&self) -> PacketType {
        PacketType::Subscribe
    }

    fn flags(&self) -> u8 {
        0x02
    }

    fn encode_body<B: BufMut>(&self, buf: &mut B) -> Result<()> {
        if self.filters.is_empty() {
            return Err(MqttError::ProtocolError(
                "SUBSCRIBE requires at least one topic filter".to_string(),
            ));
        }
        buf.put_u16(self.packet_id);
        for filter in &self.filters {
            encode_string(buf, &filter.filter)?;
            buf.put_u8(filter.qos as u8);
        }
        Ok(())
    }

    fn decode_body<B: Buf>(buf: &mut B, fixed_header: &FixedHeader) -> Result<Self> {
        if fixed_header.flags != 0x02 {
            return Err(MqttError::MalformedPacket(format!(
                "Invalid SUBSCRIBE flags: expected 0x02, got 0x{:02X}",
                fixed_header.flags
            )));
        }

        let packet_id = decode_packet_id(buf, "SUBSCRIBE")?;

        let mut filters = Vec::new();
        while buf.has_remaining() {
            let filter = decode_string(buf)?;
            if !buf.has_remaining() {
                return Err(MqttError::MalformedPacket(
                    "Missing requested QoS for topic filter".to_string(),
                ));
            }
            let options = buf.get_u8();
            if options & 0xFC != 0 {
                return Err(MqttError::MalformedPacket(format!(
                    "Reserved bits set in requested QoS byte: 0x{options:02X}"
                )));
            }
            filters.push(TopicFilter {
                filter,
                qos: QoS::try_from_u8(options)?,
            });
        }

        if filters.is_empty() {
            return Err(MqttError::MalformedPacket(
                "SUBSCRIBE must contain at least one topic filter".to_string(),
            ));
        }

        Ok(Self { packet_id, filters })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn test_subscribe_roundtrip() {
        let packet = SubscribePacket::new(42)
            .add_filter("sensors/+/temp", QoS::AtLeastOnce)
            .add_filter("status/#", QoS::AtMostOnce);
        let mut buf = BytesMut::new();
        packet.encode(&mut buf).unwrap();
        assert_eq!(buf[0], 0x82);

        let fixed_header = FixedHeader::decode(&mut buf).unwrap();
        let decoded = SubscribePacket::decode_body(&mut buf, &fixed_header).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn test_subscribe_invalid_flags() {
        let mut body = BytesMut::new();
        body.put_u16(1);
        encode_string(&mut body, "a").unwrap();
        body.put_u8(0);
        let header = FixedHeader::new(PacketType::Subscribe, 0x00, 6);
        assert!(SubscribePacket::decode_body(&mut body, &header).is_err());
    }

    #[test]
    fn test_subscribe_empty_payload() {
        let mut body = BytesMut::new();
        body.put_u16(1);
        let header = FixedHeader::new(PacketType::Subscribe, 0x02, 2);
        assert!(SubscribePacket::decode_body(&mut body, &header).is_err());
    }

    #[test]
    fn test_subscribe_reserved_qos_bits() {
        for options in [0x03u8, 0x04, 0x80] {
            let mut body = BytesMut::new();
            body.put_u16(1);
            encode_string(&mut body, "a").unwrap();
            body.put_u8(options);
            let header = FixedHeader::new(PacketType::Subscribe, 0x02, 6);
            assert!(SubscribePacket::decode_body(&mut body, &header).is_err());
        }
    }

    #[test]
    fn test_subscribe_keeps_invalid_filter_for_suback() {
        let mut body = BytesMut::new();
        body.put_u16(9);
        encode_string(&mut body, "a/#/b").unwrap();
        body.put_u8(1);
        let header = FixedHeader::new(PacketType::Subscribe, 0x02, 10);
        let decoded = SubscribePacket::decode_body(&mut body, &header).unwrap();
        assert_eq!(decoded.filters[0].filter, "a/#/b");
    }
}
