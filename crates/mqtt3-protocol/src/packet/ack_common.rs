//! Shared shape of the packets whose body is nothing but a packet identifier:
//! PUBACK, PUBREC, PUBREL, PUBCOMP and UNSUBACK.

use crate::error::{MqttError, Result};
use bytes::Buf;

pub(crate) fn decode_packet_id<B: Buf>(buf: &mut B, packet_name: &str) -> Result<u16> {
    if buf.remaining() < 2 {
        return Err(MqttError::MalformedPacket(format!(
            "{packet_name} missing packet identifier"
        )));
    }
    let packet_id = buf.get_u16();
    if packet_id == 0 {
        return Err(MqttError::MalformedPacket(format!(
            "{packet_name} packet identifier must be non-zero"
        )));
    }
    Ok(packet_id)
}

macro_rules! define_ack_packet {
    (
        $(#[$meta:meta])*
        pub struct $name:ident;
        packet_type = $packet_type:expr;
        error_prefix = $prefix:literal;
        $(flags = $flags:literal;)?
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name {
            pub packet_id: u16,
        }

        impl $name {
            #[must_use]
            pub fn new(packet_id: u16) -> Self {
                Self { packet_id }
            }
        }

        impl $crate::packet::MqttPacket for $name {
            fn packet_type(&self) -> $crate::packet::PacketType {
                $packet_type
            }

            $(
                fn flags(&self) -> u8 {
                    $flags
                }
            )?

            fn encode_body<B: bytes::BufMut>(&self, buf: &mut B) -> $crate::error::Result<()> {
                buf.put_u16(self.packet_id);
                Ok(())
            }

            fn decode_body<B: bytes::Buf>(
                buf: &mut B,
                fixed_header: &$crate::packet::FixedHeader,
            ) -> $crate::error::Result<Self> {
                if fixed_header.remaining_length != 2 {
                    return Err($crate::error::MqttError::MalformedPacket(format!(
                        "{} remaining length must be 2, got {}",
                        $prefix, fixed_header.remaining_length
                    )));
                }
                let packet_id = $crate::packet::ack_common::decode_packet_id(buf, $prefix)?;
                Ok(Self { packet_id })
            }
        }
    };
}

pub(crate) use define_ack_packet;
