use crate::error::{MqttError, Result};
use crate::packet::ack_common::decode_packet_id;
use crate::packet::{FixedHeader, MqttPacket, PacketType};
use crate::types::QoS;
use bytes::{Buf, BufMut};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubAckReturnCode {
    Granted(QoS),
    Failure,
}

impl SubAckReturnCode {
    #[must_use]
    pub fn to_u8(self) -> u8 {
        match self {
            Self::Granted(qos) => qos as u8,
            Self::Failure => 0x80,
        }
    }

    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            0..=2 => Ok(Self::Granted(QoS::from(value))),
            0x80 => Ok(Self::Failure),
            other => Err(MqttError::MalformedPacket(format!(
                "Invalid SUBACK return code: 0x{other:02X}"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubAckPacket {
    pub packet_id: u16,
    pub return_codes: Vec<SubAckReturnCode>,
}

impl SubAckPacket {
    #[must_use]
    pub fn new(packet_id: u16, return_codes: Vec<SubAckReturnCode>) -> Self {
        Self {
            packet_id,
            return_codes,
        }
    }
}

impl MqttPacket for SubAckPacket {
    fn packet_type(&self) -> PacketType {
        PacketType::SubAck
    }

    fn encode_body<B: BufMut>(&self, buf: &mut B) -> Result<()> {
        buf.put_u16(self.packet_id);
        for code in &self.return_codes {
            buf.put_u8(code.to_u8());
        }
        Ok(())
    }

    fn decode_body<B: Buf>(buf: &mut B, _fixed_header: &FixedHeader) -> Result<Self> {
        let packet_id = decode_packet_id(buf, "SUBACK")?;
        let mut return_codes = Vec::with_capacity(buf.remaining());
        while buf.has_remaining() {
            return_codes.push(SubAckReturnCode::from_u8(buf.get_u8())?);
        }
        if return_codes.is_empty() {
            return Err(MqttError::MalformedPacket(
                "SUBACK must contain at least one return code".to_string(),
            ));
        }
        Ok(Self {
            packet_id,
            return_codes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn test_suback_wire_format() {
        let packet = SubAckPacket::new(
            5,
            vec![
                SubAckReturnCode::Granted(QoS::AtLeastOnce),
                SubAckReturnCode::Failure,
            ],
        );
        let mut buf = BytesMut::new();
        packet.encode(&mut buf).unwrap();
        assert_eq!(&buf[..], &[0x90, 0x04, 0x00, 0x05, 0x01, 0x80]);

        let fixed_header = FixedHeader::decode(&mut buf).unwrap();
        assert_eq!(SubAckPacket::decode_body(&mut buf, &fixed_header).unwrap(), packet);
    }

    #[test]
    fn test_suback_invalid_code() {
        assert!(SubAckReturnCode::from_u8(0x03).is_err());
        assert!(SubAckReturnCode::from_u8(0x81).is_err());
    }
}
