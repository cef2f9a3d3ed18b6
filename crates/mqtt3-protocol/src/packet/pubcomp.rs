use super::ack_common::define_ack_packet;
use crate::packet::PacketType;

define_ack_packet! {
    /// PUBCOMP: completes the QoS 2 exchange.
    pub struct PubCompPacket;
    packet_type = PacketType::PubComp;
    error_prefix = "PUBCOMP";
}
