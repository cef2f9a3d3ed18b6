use super::ack_common::define_ack_packet;
use crate::packet::PacketType;

define_ack_packet! {
    /// PUBREL: releases a QoS 2 packet identifier. Fixed header flags are `0010`.
    pub struct PubRelPacket;
    packet_type = PacketType::PubRel;
    error_prefix = "PUBREL";
    flags = 0x02;
}
