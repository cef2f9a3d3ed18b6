use super::ack_common::define_ack_packet;
use crate::packet::PacketType;

define_ack_packet! {
    /// UNSUBACK: confirms an UNSUBSCRIBE.
    pub struct UnsubAckPacket;
    packet_type = PacketType::UnsubAck;
    error_prefix = "UNSUBACK";
}
