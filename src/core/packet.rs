//! # Packet
//!
//! A whole packet: the 23-byte header followed by the message body.
//!
//! Building a packet from a message encodes the body first and then patches
//! the length into the header, so the message is only walked once.

use crate::core::header::{NetObject, PacketHeader, HEADER_LEN};
use crate::core::wire::{BytesMut, Wire};
use crate::error::{ProtocolError, Result};
use bytes::Bytes;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub header: PacketHeader,
    pub payload: Bytes,
}

impl Packet {
    pub fn new(header: PacketHeader, payload: Bytes) -> Self {
        Self { header, payload }
    }

    /// Encode `message` into a packet stamped with `system_id`
    pub fn from_message<T: NetObject>(
        message: &T,
        system_id: i64,
        send_time: Option<i64>,
    ) -> Result<Self> {
        let mut body = BytesMut::new();
        message.encode(&mut body)?;
        let body_len = i32::try_from(body.len())
            .ok()
            .filter(|len| *len <= i32::MAX - HEADER_LEN as i32)
            .ok_or(ProtocolError::LengthOverflow(body.len()))?;
        Ok(Self {
            header: PacketHeader::for_message::<T>(body_len, system_id, send_time),
            payload: body.freeze(),
        })
    }

    /// Parse a packet from a buffer holding at least one whole packet.
    ///
    /// Bytes past the declared length are ignored.
    pub fn from_bytes(bytes: Bytes) -> Result<Self> {
        let (header, consumed) = PacketHeader::read(&bytes).ok_or(ProtocolError::InvalidHeader)?;
        let declared = header
            .body_len()
            .map(|body| body + HEADER_LEN)
            .ok_or(ProtocolError::InvalidPacketLength(header.total_length))?;
        if bytes.len() < declared {
            return Err(ProtocolError::TruncatedPacket {
                declared,
                received: bytes.len(),
            });
        }
        Ok(Self {
            header,
            payload: bytes.slice(consumed..declared),
        })
    }

    /// Size on the wire
    pub fn encoded_len(&self) -> usize {
        HEADER_LEN + self.payload.len()
    }

    /// Append header and body to `buf`
    pub fn write(&self, buf: &mut BytesMut) {
        buf.reserve(self.encoded_len());
        self.header.write(buf);
        buf.extend_from_slice(&self.payload);
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.write(&mut buf);
        buf.freeze()
    }
}

/// Encode `message` straight to wire bytes
pub fn encode_message<T: NetObject>(
    message: &T,
    system_id: i64,
    send_time: Option<i64>,
) -> Result<Bytes> {
    let mut buf = BytesMut::with_capacity(HEADER_LEN + 64);
    PacketHeader::for_message::<T>(0, system_id, send_time).write(&mut buf);
    message.encode(&mut buf)?;
    let total = i32::try_from(buf.len()).map_err(|_| ProtocolError::LengthOverflow(buf.len()))?;
    buf[..4].copy_from_slice(&total.to_le_bytes());
    Ok(buf.freeze())
}
