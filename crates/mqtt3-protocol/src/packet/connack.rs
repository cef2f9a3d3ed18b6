use crate::error::{MqttError, Result};
use crate::packet::{FixedHeader, MqttPacket, PacketType};
use crate::types::ConnectReturnCode;
use bytes::{Buf, BufMut};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnAckPacket {
    pub session_present: bool,
    pub return_code: ConnectReturnCode,
}

impl ConnAckPacket {
    #[must_use]
    pub fn new(session_present: bool, return_code: ConnectReturnCode) -> Self {
        Self {
            // A refused connection never reports a session.
            session_present: session_present && return_code.is_success(),
            return_code,
        }
    }

    #[must_use]
    pub fn accepted(session_present: bool) -> Self {
        Self::new(session_present, ConnectReturnCode::Accepted)
    }

    #[must_use]
    pub fn refused(return_code: ConnectReturnCode) -> Self {
        Self::new(false, return_code)
    }
}

impl MqttPacket for ConnAckPacket {
    fn packet_type(&self) -> PacketType {
        PacketType::ConnAck
    }

    fn encode_body<B: BufMut>(&self, buf: &mut B) -> Result<()> {
        buf.put_u8(u8::from(self.session_present));
        buf.put_u8(self.return_code as u8);
        Ok(())
    }

    fn decode_body<B: Buf>(buf: &mut B, fixed_header: &FixedHeader) -> Result<Self> {
        if fixed_header.remaining_length != 2 || buf.remaining() < 2 {
            return Err(MqttError::MalformedPacket(format!(
                "CONNACK remaining length must be 2, got {}",
                fixed_header.remaining_length
            )));
        }
        let ack_flags = buf.get_u8();
        if ack_flags & 0xFE != 0 {
            return Err(MqttError::MalformedPacket(format!(
                "Invalid CONNACK flags: 0x{ack_flags:02X}"
            )));
        }
        let code = buf.get_u8();
        let return_code = ConnectReturnCode::from_u8(code).ok_or_else(|| {
            MqttError::MalformedPacket(format!("Invalid CONNACK return code: {code}"))
        })?;
        Ok(Self {
            session_present: ack_flags & 0x01 != 0,
            return_code,
        })
    }
}
