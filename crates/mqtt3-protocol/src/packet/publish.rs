use crate::encoding::{decode_string, encode_string};
use crate::error::{MqttError, Result};
use crate::packet::{FixedHeader, MqttPacket, PacketType};
use crate::types::QoS;
use crate::validation::validate_topic_name;
use bytes::{Buf, BufMut, Bytes};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishPacket {
    pub topic_name: String,
    /// Present exactly when `qos` is above `AtMostOnce`.
    pub packet_id: Option<u16>,
    pub payload: Bytes,
    pub qos: QoS,
    pub retain: bool,
    pub dup: bool,
}

impl PublishPacket {
    #[must_use]
    pub fn new(topic_name: impl Into<String>, payload: impl Into<Bytes>, qos: QoS) -> Self {
        Self {
            topic_name: topic_name.into(),
            packet_id: None,
            payload: payload.into(),
            qos,
            retain: false,
            dup: false,
        }
    }

    #[must_use]
    pub fn with_packet_id(mut self, packet_id: u16) -> Self {
        self.packet_id = Some(packet_id);
        self
    }

    #[must_use]
    pub fn with_retain(mut self, retain: bool) -> Self {
        self.retain = retain;
        self
    }

    #[must_use]
    pub fn with_dup(mut self, dup: bool) -> Self {
        self.dup = dup;
        self
    }
}

impl MqttPacket for PublishPacket {
    fn packet_type(&self) -> PacketType {
        PacketType::Publish
    }

    fn flags(&self) -> u8 {
        let mut flags = (self.qos as u8) << 1;
        if self.dup {
            flags |= 0x08;
        }
        if self.retain {
            flags |= 0x01;
        }
        flags
    }

    fn encode_body<B: BufMut>(&self, buf: &mut B) -> Result<()> {
        encode_string(buf, &self.topic_name)?;
        match (self.qos, self.packet_id) {
            (QoS::AtMostOnce, _) => {}
            (_, Some(packet_id)) if packet_id != 0 => buf.put_u16(packet_id),
            _ => {
                return Err(MqttError::ProtocolError(format!(
                    "PUBLISH with {:?} requires a non-zero packet identifier",
                    self.qos
                )))
            }
        }
        buf.put_slice(&self.payload);
        Ok(())
    }

    fn decode_body<B: Buf>(buf: &mut B, fixed_header: &FixedHeader) -> Result<Self> {
        let qos = QoS::try_from_u8((fixed_header.flags >> 1) & 0x03)?;
        let dup = fixed_header.flags & 0x08 != 0;
        let retain = fixed_header.flags & 0x01 != 0;

        let topic_name = decode_string(buf)?;
        validate_topic_name(&topic_name)?;

        let packet_id = if qos == QoS::AtMostOnce {
            None
        } else {
            if buf.remaining() < 2 {
                return Err(MqttError::MalformedPacket(
                    "PUBLISH missing packet identifier".to_string(),
                ));
            }
            match buf.get_u16() {
                0 => {
                    return Err(MqttError::MalformedPacket(
                        "PUBLISH packet identifier must be non-zero".to_string(),
                    ))
                }
                id => Some(id),
            }
        };

        let payload = buf.copy_to_bytes(buf.remaining());

        Ok(Self {
            topic_name,
            packet_id,
            payload,
            qos,
            retain,
            dup,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    fn roundtrip(packet: &PublishPacket) -> PublishPacket {
        let mut buf = BytesMut::new();
        packet.encode(&mut buf).unwrap();
        let fixed_header = FixedHeader::decode(&mut buf).unwrap();
        PublishPacket::decode_body(&mut buf, &fixed_header).unwrap()
    }

    #[test]
    fn test_publish_qos0_wire_format() {
        let packet = PublishPacket::new("a/b", &b"hi"[..], QoS::AtMostOnce);
        let mut buf = BytesMut::new();
        packet.encode(&mut buf).unwrap();
        assert_eq!(&buf[..], &[0x30, 0x07, 0x00, 0x03, b'a', b'/', b'b', b'h', b'i']);
    }

    #[test]
    fn test_publish_qos2_flags() {
        let packet = PublishPacket::new("t", Bytes::new(), QoS::ExactlyOnce)
            .with_packet_id(10)
            .with_dup(true)
            .with_retain(true);
        assert_eq!(packet.flags(), 0x0D);
        assert_eq!(roundtrip(&packet), packet);
    }

    #[test]
    fn test_publish_requires_packet_id() {
        let packet = PublishPacket::new("t", Bytes::new(), QoS::AtLeastOnce);
        let mut buf = BytesMut::new();
        assert!(packet.encode(&mut buf).is_err());
    }

    #[test]
    fn test_publish_rejects_wildcard_topic() {
        let mut body = BytesMut::new();
        encode_string(&mut body, "a/+").unwrap();
        let header = FixedHeader::new(PacketType::Publish, 0, 5);
        assert!(PublishPacket::decode_body(&mut body, &header).is_err());
    }

    #[test]
    fn test_publish_rejects_zero_packet_id() {
        let mut body = BytesMut::new();
        encode_string(&mut body, "a").unwrap();
        body.put_u16(0);
        let header = FixedHeader::new(PacketType::Publish, 0x02, 5);
        assert!(PublishPacket::decode_body(&mut body, &header).is_err());
    }

    #[test]
    fn test_publish_empty_payload() {
        let packet = PublishPacket::new("status/online", Bytes::new(), QoS::AtMostOnce)
            .with_retain(true);
        let decoded = roundtrip(&packet);
        assert!(decoded.payload.is_empty());
        assert!(decoded.retain);
    }
}
