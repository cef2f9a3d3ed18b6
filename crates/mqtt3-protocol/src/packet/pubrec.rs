use super::ack_common::define_ack_packet;
use crate::packet::PacketType;

define_ack_packet! {
    /// PUBREC: first reply in the QoS 2 exchange.
    pub struct PubRecPacket;
    packet_type = PacketType::PubRec;
    error_prefix = "PUBREC";
}
