//! Packet I/O over a byte stream
//!
//! The broker accepts any bidirectional byte stream (a TCP socket, a TLS
//! session terminated elsewhere, an in-memory duplex pipe) and frames packets
//! on top of it with [`PacketDecoder`].

use crate::codec::{encode_packet, PacketDecoder};
use crate::error::{MqttError, Result};
use crate::packet::Packet;
use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

pub struct PacketStream<S> {
    stream: S,
    decoder: PacketDecoder,
    read_buffer: BytesMut,
    write_buffer: BytesMut,
}

impl<S> PacketStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    #[must_use]
    pub fn new(stream: S, max_packet_size: usize) -> Self {
        Self {
            stream,
            decoder: PacketDecoder::new(max_packet_size),
            read_buffer: BytesMut::with_capacity(4096),
            write_buffer: BytesMut::with_capacity(4096),
        }
    }

    /// Reads the next complete packet.
    ///
    /// Cancel safe: bytes already read stay buffered for the next call.
    /// End of stream yields [`MqttError::ConnectionClosedByPeer`].
    pub async fn read_packet(&mut self) -> Result<Packet> {
        loop {
            if let Some(packet) = self.decoder.decode(&mut self.read_buffer)? {
                trace!(packet_type = ?packet.packet_type(), "Read packet");
                return Ok(packet);
            }
            let n = self.stream.read_buf(&mut self.read_buffer).await?;
            if n == 0 {
                return Err(MqttError::ConnectionClosedByPeer);
            }
        }
    }

    /// Writes and flushes one packet. Not cancel safe: a cancelled write may
    /// leave a partial packet on the stream.
    pub async fn write_packet(&mut self, packet: &Packet) -> Result<()> {
        self.write_buffer.clear();
        encode_packet(packet, &mut self.write_buffer)?;
        self.stream.write_all(&self.write_buffer).await?;
        self.stream.flush().await?;
        trace!(packet_type = ?packet.packet_type(), bytes = self.write_buffer.len(), "Wrote packet");
        Ok(())
    }

    pub async fn shutdown(&mut self) {
        let _ = self.stream.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{PubAckPacket, PublishPacket};
    use crate::QoS;
    use bytes::Bytes;

    #[tokio::test]
    async fn test_packets_cross_a_duplex_pipe() {
        let (a, b) = tokio::io::duplex(64);
        let mut left = PacketStream::new(a, 1024);
        let mut right = PacketStream::new(b, 1024);

        let publish = Packet::Publish(
            PublishPacket::new("a/b", Bytes::from_static(b"hello"), QoS::AtLeastOnce)
                .with_packet_id(7),
        );
        left.write_packet(&publish).await.unwrap();
        left.write_packet(&Packet::PubAck(PubAckPacket::new(7))).await.unwrap();

        assert_eq!(right.read_packet().await.unwrap(), publish);
        assert_eq!(
            right.read_packet().await.unwrap(),
            Packet::PubAck(PubAckPacket::new(7))
        );
    }

    #[tokio::test]
    async fn test_end_of_stream() {
        let (a, b) = tokio::io::duplex(64);
        drop(a);
        let mut right = PacketStream::new(b, 1024);
        assert!(matches!(
            right.read_packet().await,
            Err(MqttError::ConnectionClosedByPeer)
        ));
    }

    #[tokio::test]
    async fn test_oversized_packet() {
        let (mut a, b) = tokio::io::duplex(64);
        a.write_all(&[0x30, 0x7F]).await.unwrap();
        let mut right = PacketStream::new(b, 16);
        assert!(matches!(
            right.read_packet().await,
            Err(MqttError::PacketTooLarge { .. })
        ));
    }
}
