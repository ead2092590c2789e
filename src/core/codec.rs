//! # Packet Codec
//!
//! Tokio codec that frames packets on a TCP byte stream.
//!
//! Packets are sent back to back; the first four bytes of each are its total
//! length. The decoder tolerates arbitrarily small reads and only yields once
//! the whole packet has arrived.
//!
//! ```text
//! [TotalLength(4)] [rest of header(19)] [Body(TotalLength - 23)]
//! ```

use crate::config::MAX_PACKET_SIZE;
use crate::core::header::HEADER_LEN;
use crate::core::packet::Packet;
use crate::error::{ProtocolError, Result};
use bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::debug;

const LENGTH_PREFIX: usize = 4;

#[derive(Debug, Clone, Copy)]
pub struct PacketCodec {
    max_packet_size: usize,
}

impl PacketCodec {
    pub fn new(max_packet_size: usize) -> Self {
        Self { max_packet_size }
    }

    pub fn max_packet_size(&self) -> usize {
        self.max_packet_size
    }
}

impl Default for PacketCodec {
    fn default() -> Self {
        Self::new(MAX_PACKET_SIZE)
    }
}

impl Decoder for PacketCodec {
    type Item = Packet;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if src.len() < LENGTH_PREFIX {
            return Ok(None);
        }

        let declared = i32::from_le_bytes([src[0], src[1], src[2], src[3]]);
        if declared < HEADER_LEN as i32 {
            return Err(ProtocolError::InvalidPacketLength(declared));
        }

        let declared = declared as usize;
        if declared > self.max_packet_size {
            return Err(ProtocolError::OversizedPacket(declared));
        }

        if src.len() < declared {
            src.reserve(declared - src.len());
            return Ok(None);
        }

        let frame = src.split_to(declared).freeze();
        Packet::from_bytes(frame).map(Some)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if let Some(packet) = self.decode(src)? {
            return Ok(Some(packet));
        }
        if !src.is_empty() {
            debug!(discarded = src.len(), "Discarding partial packet at end of stream");
            src.clear();
        }
        Ok(None)
    }
}

impl Encoder<Packet> for PacketCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Packet, dst: &mut BytesMut) -> Result<()> {
        let len = item.encoded_len();
        if len > self.max_packet_size {
            return Err(ProtocolError::OversizedPacket(len));
        }
        item.write(dst);
        Ok(())
    }
}

/// Pre-encoded packets (see `encode_message`) pass through unchanged
impl Encoder<Bytes> for PacketCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<()> {
        if item.len() > self.max_packet_size {
            return Err(ProtocolError::OversizedPacket(item.len()));
        }
        dst.extend_from_slice(&item);
        Ok(())
    }
}
